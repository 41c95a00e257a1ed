mod frame;
pub use frame::{Frame, FrameError};

pub mod clients;
pub use clients::Client;

mod error;
pub use error::HandlerError;

mod reliability;
pub use reliability::ReliabilityMode;

mod options;
pub use options::HandlerOptions;

mod lifecycle;
pub use lifecycle::LifecycleState;

mod command;
pub use command::{encode_args, OutputSink, RedisCommand, SimpleCommand};

mod decoder;

mod queue;

mod transport;

pub mod handler;
pub use handler::{ConnectionHandler, UpperHandler};

/// Redis 服务器监听的默认端口。
///
/// 如果未指定端口，则使用此端口。
pub const DEFAULT_PORT: u16 = 6379;

/// 大多数函数返回的错误类型。
///
/// 热点路径（连接处理核心）使用 `HandlerError` 这个具名 `enum`，调用方可以对其
/// 做模式匹配；这个装箱类型只用于 `clients::Client` 这种更高层、不追求零分配的便利 API。
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// `clients::Client` 操作的专用 `Result` 类型。
pub type Result<T> = std::result::Result<T, Error>;
