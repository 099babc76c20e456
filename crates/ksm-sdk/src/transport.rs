//! Request framing and the HTTP seam.
//!
//! The client never talks to the network itself. It builds an
//! [`HttpRequest`] (URL, headers, encrypted body) and hands it to a caller
//! supplied [`Transport`]; timeouts, proxies and TLS policy live there.

use ksm_core::KsmResult;

pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_PUBLIC_KEY_ID: &str = "PublicKeyId";
pub const HEADER_TRANSMISSION_KEY: &str = "TransmissionKey";
pub const HEADER_AUTHORIZATION: &str = "Authorization";

pub const CONTENT_TYPE_ENVELOPE: &str = "application/octet-stream";

/// Endpoints under `/api/rest/sm/v1/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    GetSecret,
    UpdateSecret,
    CreateSecret,
    DeleteSecret,
    CreateFolder,
    UpdateFolder,
    DeleteFolder,
    AddFile,
    CompleteTransaction,
}

impl Operation {
    pub fn path(self) -> &'static str {
        match self {
            Operation::GetSecret => "get_secret",
            Operation::UpdateSecret => "update_secret",
            Operation::CreateSecret => "create_secret",
            Operation::DeleteSecret => "delete_secret",
            Operation::CreateFolder => "create_folder",
            Operation::UpdateFolder => "update_folder",
            Operation::DeleteFolder => "delete_folder",
            Operation::AddFile => "add_file",
            Operation::CompleteTransaction => "complete_transaction",
        }
    }

    pub fn url(self, hostname: &str) -> String {
        format!("https://{hostname}/api/rest/sm/v1/{}", self.path())
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// First header named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one request and returns the raw response. Network failures should
/// be reported as `KsmError::Transport`; the client does not retry them.
pub trait Transport {
    fn post(&self, request: &HttpRequest) -> KsmResult<HttpResponse>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn post(&self, request: &HttpRequest) -> KsmResult<HttpResponse> {
        (**self).post(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_urls() {
        assert_eq!(
            Operation::GetSecret.url("keepersecurity.com"),
            "https://keepersecurity.com/api/rest/sm/v1/get_secret"
        );
        assert_eq!(Operation::CompleteTransaction.path(), "complete_transaction");
    }

    #[test]
    fn header_lookup_ignores_case() {
        let request = HttpRequest {
            url: String::new(),
            headers: vec![("PublicKeyId".into(), "7".into())],
            body: Vec::new(),
        };
        assert_eq!(request.header("publickeyid"), Some("7"));
        assert_eq!(request.header("Authorization"), None);
    }
}
