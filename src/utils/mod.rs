pub mod json;
pub mod paging;
pub mod search;
