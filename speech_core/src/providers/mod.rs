mod http;

pub use http::HttpSpeechProvider;
