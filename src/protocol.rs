//! Shared protocol constants for the filevault wire format

// Maximum blob payload size (64MB) - prevents DoS via memory exhaustion
pub const MAX_BLOB_SIZE: usize = 64 * 1024 * 1024;

// Largest blob an int32 length prefix can describe; outgoing content is only bounded by this
pub const MAX_WIRE_BLOB: usize = i32::MAX as usize;

// Strings are prefixed with a u16 byte count
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

pub const DEFAULT_BIND: &str = "127.0.0.1:23456";
pub const DEFAULT_BACKLOG: u32 = 50;
pub const DEFAULT_WORKERS: usize = 10;

// Action tags, always the first string of a request
pub mod action {
    pub const EXIT: &str = "EXIT";
    pub const PUT: &str = "PUT";
    pub const GET: &str = "GET";
    pub const DELETE: &str = "DELETE";
}

// Lookup modes for GET and DELETE
pub mod mode {
    pub const BY_NAME: &str = "BY_NAME";
    pub const BY_ID: &str = "BY_ID";
}

// Status codes, always the first int32 of a response
pub mod status {
    pub const OK: i32 = 200;
    pub const FORBIDDEN: i32 = 403;
    pub const NOT_FOUND: i32 = 404;
}
