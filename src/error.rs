use crate::protocol::MAX_PAYLOAD_LEN;

#[derive(Debug, thiserror::Error)]
pub enum AttenuatorError {
    #[error("Device not found")]
    DeviceNotFound,

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("Command is {0} bytes long, at most {max} fit in one packet", max = MAX_PAYLOAD_LEN)]
    PayloadTooLong(usize),

    #[error("Command contains non-ASCII characters: {0:?}")]
    NonAscii(String),

    #[error("Invalid channel {channel}. Please select a channel between 1 and {max}.")]
    InvalidChannel { channel: u8, max: u8 },

    #[error("Invalid attenuation value: {0}")]
    InvalidAttenuation(f64),

    #[error("Wrote {written} of {expected} command bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("Failed to initialize the device: {0}")]
    Initialize(Box<AttenuatorError>),

    #[error("Device returned an empty response")]
    EmptyResponse,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AttenuatorError>;
