//! Exit codes for the CLI binary (§6): `0` success including partial
//! per-row failures, `1` infrastructure failure, `2` invalid CLI options
//! (clap's own convention, returned automatically by `Parser::parse`).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    InfrastructureFailure = 1,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}
