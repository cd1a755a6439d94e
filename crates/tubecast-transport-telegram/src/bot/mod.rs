/// Command and link handlers
pub mod handlers;
/// Telegram implementation of the delivery pipeline's chat seam
pub mod transport;

pub use transport::TelegramChatTransport;
