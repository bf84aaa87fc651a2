//! Vaxload binary: run a load test against a school-aged immunisation service.
//!
//! All behavior is configured on the command line, see `vaxload --help`.

use vaxload::{LoadTest, VaxloadError};

fn main() -> Result<(), VaxloadError> {
    LoadTest::initialize()?.execute()?.print();

    Ok(())
}
