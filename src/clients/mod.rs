//! 外部协作方的 HTTP 适配器

pub mod search;
pub mod weather;

pub use search::SerpApiClient;
pub use weather::WeatherApiClient;
