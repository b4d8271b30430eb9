pub mod icons;
pub mod output;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{dim, error, info, key, muted, section, success, warn};
pub use table::{fragment_table, link_table, statistics_table, version_table};
pub use theme::{theme, Theme};
