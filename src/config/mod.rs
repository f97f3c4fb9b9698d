mod server;
mod settings;

pub use server::ServerConfig;
pub use settings::{
    CodeHostConfig, DEFAULT_CODE_HOST_API_URL, DEFAULT_COMMIT_MESSAGE, DEFAULT_CURRENCY,
    PaymentConfig, Settings, TransferConfig,
};
