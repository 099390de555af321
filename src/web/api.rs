pub mod proxy_api;
