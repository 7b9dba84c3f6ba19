pub mod cache;
pub mod config;
pub mod encode;
pub mod event;
pub mod exception;
pub mod header;
pub mod param;
pub mod preprocess;
pub mod request;
pub mod resource;
pub mod security;
pub mod server;

pub use cache::{ResourceCache, ResourceStream};
pub use config::Config;
pub use encode::BodyEncoding;
pub use event::{HttpEvent, HttpPeer};
pub use exception::HttpException;
pub use header::{AcceptEncoding, Credential, HeaderValue, HttpHeaders};
pub use param::{HttpRequestMethod, HttpVersion};
pub use preprocess::{PreProcessSource, PreProcessor};
pub use request::{read_request, HttpRequest};
pub use resource::{Locator, ResourceAttributes, ResourceStore};
pub use security::{CredentialVerifier, PasswordStore};
pub use server::{HttpServer, MarkdownRenderer, RequestMatcher};
