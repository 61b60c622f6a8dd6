//! Records, windows and statistics tables shared by every stage.

pub mod record;
pub mod table;
pub mod window;

pub use record::{Dimensions, GroupingKey, Index, RawRecord, Record, SubItem};
pub use table::{
    Contribution, CrossStats, GlobalEntry, GlobalTable, LocalEntry, LocalTable, StatsEntry,
    StatsKey, StatsTable, TableEntry,
};
pub use window::{Window, WindowError};
