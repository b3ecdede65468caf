pub mod progress_cache;
