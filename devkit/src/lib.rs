/*!
# Fleet DevKit - test tooling for the fleet kernel

- `TestHarness`: a full coordinator over a seeded simulated probe and an
  in-memory event sink
- `fixtures`: node builders and canned probe readings
- `fleet_test!`: one-line async test declaration around a harness
*/

pub mod fixtures;
pub mod test_utils;

pub use anyhow;
pub use fixtures::{node, NodeBuilder};
pub use test_utils::TestHarness;
