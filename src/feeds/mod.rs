pub mod cache;
pub mod history;

pub use history::HistoryStore;
