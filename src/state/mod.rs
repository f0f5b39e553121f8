//! State module for tracking crawl progress
//!
//! - `PipelineState`: the stage a page (or, through its root page, a session) is in
//! - `StateTrail`: the ordered transitions a page took, used in job reports

mod page_state;

pub use page_state::{PipelineState, StateTrail};
