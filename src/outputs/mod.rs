//! Output generation modules for CSV and HTML artifacts.
//!
//! # Submodules
//!
//! - [`csv`]: Per-site and combined event CSV files, plus reading them back
//! - [`html`]: Styled, date-sorted HTML table rendered from the combined CSV
//!
//! # Output Structure
//!
//! ```text
//! data_dir/
//! ├── visit_chattanooga_events.csv   # one per site
//! ├── chatt_library_events.csv
//! ├── all_events.csv                 # every site, with a `source` column
//! └── events_table.html              # rendered from all_events.csv
//!
//! log_dir/
//! ├── ai_extraction.log              # run log
//! └── visit_chattanooga.html         # raw page snapshot per site
//! ```

pub mod csv;
pub mod html;
