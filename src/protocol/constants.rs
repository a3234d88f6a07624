//! Line Protocol Constants

// Client commands
pub const QUIT_COMMAND: &str = "/quit";
pub const BROADCAST_COMMAND: &str = "/broadcast";

// Separator between the broadcast command and its payload
pub const BROADCAST_SEPARATOR: char = ' ';

// Longest accepted line in bytes, terminator excluded
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

// Default endpoint
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
