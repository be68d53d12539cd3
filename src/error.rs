use thiserror::Error;

/// A malformed or truncated frame. Fatal to the connection it was read from.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid length field '{0}'")]
    InvalidLength(String),

    #[error("invalid integer '{0}'")]
    InvalidInteger(String),

    #[error("bulk string length mismatch: declared {declared}, found {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("unsupported frame type byte 0x{0:02x}")]
    UnsupportedType(u8),

    #[error("expected a snapshot bulk header, got byte 0x{0:02x}")]
    NotASnapshot(u8),

    #[error("connection reset by peer mid-frame")]
    UnexpectedEof,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors local to a single command. The `Display` text is what the client sees.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    #[error("ERR PX value ({0}) is not an integer")]
    PxNotInteger(String),

    #[error("ERR invalid expire time in 'set' command")]
    InvalidExpireTime,

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),
}

/// Failure while bootstrapping a replica against its master.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("failed to connect to master {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to master {0}")]
    DialTimeout(String),

    #[error("master closed the connection during {0}")]
    Closed(&'static str),

    #[error("master did not answer {0} in time")]
    ReplyTimeout(&'static str),

    #[error("unexpected reply during {stage}: {reply}")]
    UnexpectedReply { stage: &'static str, reply: String },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection registry is empty")]
    Empty,
}
