pub mod auth_detect;
pub mod browser;
#[cfg(feature = "chrome")]
pub mod chrome;
pub mod crawler;
mod dom;
pub mod error;
pub mod extractor;
pub mod forms;
pub mod interceptor;
pub mod normalize;
pub mod result;
pub mod scout;
pub mod static_driver;

pub use browser::{BrowserLauncher, BrowserPage, LaunchOptions, Locator, Role};
#[cfg(feature = "chrome")]
pub use chrome::ChromeLauncher;
pub use crawler::Crawler;
pub use error::ScanError;
pub use extractor::{ExtractionPolicy, UiSnapshot};
pub use forms::{DiscoveredForm, FormField};
pub use interceptor::{ApiRecorder, CapturedApi};
pub use result::PageResult;
pub use scout::{Scout, ScoutedPage};
pub use static_driver::{StaticBrowser, StaticPage};
