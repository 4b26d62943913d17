//! Data stages of the pipeline: preparation, target resolution, split and scaling.

pub mod preparer;
pub mod split;
pub mod target;

pub use preparer::{DataPreparer, PreparedDataset};
pub use split::{Split, StandardScaler, train_test_split};
pub use target::{EncodedTarget, MAX_INTEGER_CLASSES, detect_problem_type, resolve_target};
