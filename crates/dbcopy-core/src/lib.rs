//! Model metadata, value conversion and query synthesis for copying openM++
//! models, runs, input sets and tasks between databases and text files.

pub mod calc;
pub mod cell;
pub mod csv;
pub mod digest;
pub mod error;
pub mod facet;
pub mod format;
pub mod ini;
pub mod lang;
pub mod layout;
pub mod model;
pub mod model_txt;
pub mod progress;
pub mod run;
pub mod task;
pub mod workset;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{classify, DbcopyError, ErrorKind, Result};
pub use model::ModelMeta;
pub use progress::{CancelFlag, Context, LogProgress, ProgressSink};
pub use run::{RunMeta, RunPub, RunStatus};
pub use task::{TaskMeta, TaskPub};
pub use workset::{WorksetMeta, WorksetPub};
