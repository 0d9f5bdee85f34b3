//! Resolving input arguments to raw image bytes.

use std::fs;
use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use reqwest::blocking::{Client, ClientBuilder};
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use url::Url;

use crate::config::FetchConfig;
use crate::error_codes::CodedError;

const ACCEPTED_CONTENT_TYPES: &[&str] = &[
    "application/octet-stream",
    "image/png",
    "image/gif",
    "image/jpeg",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Stdin,
    File(PathBuf),
    Http(Url),
}

impl InputSource {
    /// Interprets a command-line argument as a path, `file://` URL, or
    /// `http(s)://` URL.
    pub fn parse(raw: &str) -> Result<Self> {
        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                return Ok(Self::File(PathBuf::from(raw)));
            }
            Err(error) => {
                return Err(CodedError::input(
                    "UNRECOGNIZED_URL",
                    format!("unrecognized url '{raw}': {error}"),
                )
                .into())
            }
        };

        match url.scheme() {
            "file" => url.to_file_path().map(Self::File).map_err(|()| {
                CodedError::input("UNRECOGNIZED_URL", format!("invalid file url '{raw}'")).into()
            }),
            "http" | "https" => Ok(Self::Http(url)),
            // single-letter schemes are drive prefixes such as `C:\image.png`
            scheme if scheme.len() == 1 => Ok(Self::File(PathBuf::from(raw))),
            _ => Err(CodedError::input("UNRECOGNIZED_URL", format!("unrecognized url: {raw}")).into()),
        }
    }

    pub fn display_label(&self) -> String {
        match self {
            Self::Stdin => "<stdin>".to_owned(),
            Self::File(path) => path.display().to_string(),
            Self::Http(url) => url.to_string(),
        }
    }

    pub fn read_bytes(&self, fetch: &FetchConfig) -> Result<Vec<u8>> {
        match self {
            Self::Stdin => {
                let mut bytes = Vec::new();
                std::io::stdin().lock().read_to_end(&mut bytes).map_err(|error| {
                    CodedError::input("READ_STDIN", format!("failed to read stdin: {error}"))
                })?;
                Ok(bytes)
            }
            Self::File(path) => fs::read(path).map_err(|error| {
                CodedError::input(
                    "READ_FILE",
                    format!("failed to read {}: {error}", path.display()),
                )
                .into()
            }),
            Self::Http(url) => fetch_http(url, fetch),
        }
    }
}

fn client_builder(fetch: &FetchConfig) -> ClientBuilder {
    Client::builder()
        .timeout(fetch.timeout)
        .redirect(Policy::none())
        .user_agent(fetch.user_agent.as_str())
}

fn fetch_http(url: &Url, fetch: &FetchConfig) -> Result<Vec<u8>> {
    let client = client_builder(fetch)
        .build()
        .context("failed to build http client")?;
    tracing::info!(%url, timeout_ms = fetch.timeout.as_millis() as u64, "fetching image");
    fetch_with(&client, url)
}

fn fetch_with(client: &Client, url: &Url) -> Result<Vec<u8>> {
    let response = client.get(url.clone()).send().map_err(|error| {
        if error.is_timeout() {
            CodedError::network("HTTP_TIMEOUT", format!("timed out fetching {url}"))
        } else {
            CodedError::network("HTTP_REQUEST", format!("request to {url} failed: {error}"))
        }
    })?;

    let status = response.status();
    if status.is_redirection() {
        return Err(CodedError::network("HTTP_REDIRECT", format!("http: {status} {url}")).into());
    }
    if !status.is_success() {
        return Err(CodedError::network("HTTP_STATUS", format!("http: {status} {url}")).into());
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    if !is_accepted_content_type(&content_type) {
        return Err(CodedError::network(
            "HTTP_CONTENT_TYPE",
            format!("mime: '{content_type}' {url}"),
        )
        .into());
    }

    let bytes = response.bytes().map_err(|error| {
        if error.is_timeout() {
            CodedError::network("HTTP_TIMEOUT", format!("timed out reading {url}"))
        } else {
            CodedError::network("HTTP_BODY", format!("failed to read body of {url}: {error}"))
        }
    })?;
    tracing::debug!(%url, bytes = bytes.len(), "fetched image");
    Ok(bytes.to_vec())
}

fn is_accepted_content_type(raw: &str) -> bool {
    let essence = raw
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    ACCEPTED_CONTENT_TYPES.contains(&essence.as_str())
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::path::PathBuf;
    use std::thread;

    use reqwest::blocking::Client;
    use url::Url;

    use super::{client_builder, fetch_with, is_accepted_content_type, InputSource};
    use crate::config::FetchConfig;
    use crate::error_codes::{exit_code_for, find_coded_error, CodedErrorKind};

    /// Answers a single request with `response` and closes the connection.
    fn serve_once(response: &'static str) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut chunk = [0_u8; 1024];
            while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                let read = stream.read(&mut chunk).unwrap();
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..read]);
            }
            stream.write_all(response.as_bytes()).unwrap();
        });
        Url::parse(&format!("http://{address}/image.png")).unwrap()
    }

    fn local_client() -> Client {
        client_builder(&FetchConfig::default())
            .no_proxy()
            .build()
            .unwrap()
    }

    fn fetch_error(response: &'static str) -> anyhow::Error {
        let url = serve_once(response);
        fetch_with(&local_client(), &url).unwrap_err()
    }

    #[test]
    fn accepted_responses_return_the_body() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: 4\r\nConnection: close\r\n\r\nPNG!",
        );
        let bytes = fetch_with(&local_client(), &url).unwrap();
        assert_eq!(bytes, b"PNG!");
    }

    #[test]
    fn redirects_are_not_followed() {
        let error = fetch_error(
            "HTTP/1.1 302 Found\r\nLocation: http://127.0.0.1:9/moved.png\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        let coded = find_coded_error(&error).unwrap();
        assert_eq!(coded.code, "HTTP_REDIRECT");
        assert_eq!(coded.kind, CodedErrorKind::Network);
    }

    #[test]
    fn error_statuses_exit_with_network_code() {
        let error = fetch_error(
            "HTTP/1.1 404 Not Found\r\nContent-Type: image/png\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        let coded = find_coded_error(&error).unwrap();
        assert_eq!(coded.code, "HTTP_STATUS");
        assert!(coded.message.contains("404"), "{}", coded.message);
        assert_eq!(exit_code_for(&error), 4);
    }

    #[test]
    fn html_responses_are_rejected() {
        let error = fetch_error(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: 6\r\nConnection: close\r\n\r\n<html>",
        );
        let coded = find_coded_error(&error).unwrap();
        assert_eq!(coded.code, "HTTP_CONTENT_TYPE");
        assert_eq!(exit_code_for(&error), 4);
    }

    #[test]
    fn bare_paths_are_files() {
        assert_eq!(
            InputSource::parse("images/motd.png").unwrap(),
            InputSource::File(PathBuf::from("images/motd.png"))
        );
    }

    #[test]
    fn file_urls_resolve_to_paths() {
        assert_eq!(
            InputSource::parse("file:///tmp/a.gif").unwrap(),
            InputSource::File(PathBuf::from("/tmp/a.gif"))
        );
    }

    #[test]
    fn http_urls_are_fetched() {
        let source = InputSource::parse("https://i.imgur.com/872FDBm.gif").unwrap();
        assert!(matches!(source, InputSource::Http(_)));
    }

    #[test]
    fn unknown_schemes_are_input_errors() {
        let error = InputSource::parse("ftp://example.com/a.png").unwrap_err();
        let coded = find_coded_error(&error).unwrap();
        assert_eq!(coded.kind, CodedErrorKind::Input);
        assert_eq!(coded.code, "UNRECOGNIZED_URL");
    }

    #[test]
    fn content_type_parameters_are_ignored() {
        assert!(is_accepted_content_type("image/gif"));
        assert!(is_accepted_content_type("Image/PNG; charset=binary"));
        assert!(!is_accepted_content_type("text/html; charset=utf-8"));
        assert!(!is_accepted_content_type(""));
    }
}
