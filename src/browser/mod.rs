//! 浏览器接入
//!
//! - `connection` - 连接已开启调试端口的浏览器
//! - `headless` - 启动无头浏览器
//! - `cdp_document` - `DocumentPort` 的浏览器实现

pub mod cdp_document;
pub mod connection;
pub mod headless;

pub use cdp_document::CdpDocument;
pub use connection::connect_to_browser_and_page;
pub use headless::launch_headless_browser;
