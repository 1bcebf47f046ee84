// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `pkgtest` failures.
///
/// The low two bits carry the verdict of a run: bit 1 is set if any package failed to install
/// with the interpreter under test, and bit 2 is set if any package's reconciled test status is
/// not `OK`. Higher values indicate that the tool itself could not complete.
///
/// Unknown/unexpected failures will always result in exit code 1 as well, so tooling that needs
/// to tell the two apart should also inspect the JSON summary.
pub enum PkgtestExitCode {}

impl PkgtestExitCode {
    /// All packages installed and every reconciled package is `OK`.
    pub const OK: i32 = 0;

    /// At least one package failed to install.
    pub const INSTALL_FAILED: i32 = 1;

    /// At least one package's test status is not `OK`.
    pub const TEST_FAILED: i32 = 2;

    /// Both an install failure and a test failure occurred.
    pub const INSTALL_AND_TEST_FAILED: i32 = Self::INSTALL_FAILED | Self::TEST_FAILED;

    /// An illegal test status transition was attempted. This is a bug in pkgtest.
    pub const INVARIANT_VIOLATION: i32 = 70;

    /// A user issue happened while setting up a pkgtest invocation.
    pub const SETUP_ERROR: i32 = 96;

    /// Reading the subprocess output stream failed.
    pub const STREAM_READ_ERROR: i32 = 104;

    /// Writing reports, stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;

    /// Computes the verdict exit code for a run.
    pub fn from_verdict(install_failed: bool, test_failed: bool) -> i32 {
        let mut code = Self::OK;
        if install_failed {
            code |= Self::INSTALL_FAILED;
        }
        if test_failed {
            code |= Self::TEST_FAILED;
        }
        code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(false, false, 0 ; "clean run")]
    #[test_case(true, false, 1 ; "install failure only")]
    #[test_case(false, true, 2 ; "test failure only")]
    #[test_case(true, true, 3 ; "both")]
    fn verdict_bits(install_failed: bool, test_failed: bool, expected: i32) {
        assert_eq!(
            PkgtestExitCode::from_verdict(install_failed, test_failed),
            expected
        );
    }
}
