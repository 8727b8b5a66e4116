use thiserror::Error;

#[derive(Error, Debug)]
pub enum DlepParseError {
    #[error("message truncated: need {needed} more bytes")]
    Truncated { needed: usize },

    #[error("message length field {expected} does not match payload length {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("unknown signal id {signal}")]
    UnknownSignal { signal: u16 },

    #[error("unknown data item id {item}")]
    UnknownDataItem { item: u16 },

    #[error("invalid length {len} for data item {name}")]
    InvalidItemLength { name: &'static str, len: usize },

    #[error("invalid prefix length {prefix} in data item {name}")]
    InvalidPrefix { name: &'static str, prefix: u8 },

    #[error("Nom parsing error: {0}")]
    NomError(String),
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for DlepParseError {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        match err {
            nom::Err::Incomplete(needed) => {
                let needed_bytes = match needed {
                    nom::Needed::Unknown => 0,
                    nom::Needed::Size(size) => size.get(),
                };
                DlepParseError::Truncated {
                    needed: needed_bytes,
                }
            }
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                DlepParseError::NomError(format!("{:?}: {:?}", e.code, e.input))
            }
        }
    }
}
