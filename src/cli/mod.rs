//! CLI Module
//!
//! Exit codes and traffic rendering shared by the command-line front end

pub mod exit_codes;

pub use exit_codes::{exit_code_description, CliResult, ExitCodes};

use crate::core::codec::{decode, TextFormat};
use crate::core::logger::Direction;
use chrono::Local;

/// One traffic line as the `run` command prints it
pub fn render_traffic(
    direction: Direction,
    endpoint: &str,
    bytes: &[u8],
    format: TextFormat,
    timestamps: bool,
) -> String {
    let arrow = match direction {
        Direction::Rx => "<-",
        Direction::Tx => "->",
    };
    let text = decode(bytes, format);
    let text = text.escape_debug();
    if timestamps {
        format!("[{}] {} {} {}", Local::now().format("%H:%M:%S%.3f"), arrow, endpoint, text)
    } else {
        format!("{} {} {}", arrow, endpoint, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_traffic() {
        assert_eq!(
            render_traffic(Direction::Rx, "dev", &[0x01, 0xAB], TextFormat::Hex, false),
            "<- dev 01 AB"
        );
        assert_eq!(
            render_traffic(Direction::Tx, "dev", b"ok\r\n", TextFormat::Utf8, false),
            "-> dev ok\\r\\n"
        );
    }
}
