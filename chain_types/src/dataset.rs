//! Dataset wire encoding: a dataset URL travels over HTTP as an
//! unpadded URL-safe base64 token.

use snafu::{ResultExt, Snafu};

/// Errors returned by [`dataset_decode`].
#[derive(Debug, Snafu)]
pub enum DatasetDecodeError {
    /// The token was not valid URL-safe base64.
    #[snafu(display("invalid base64 in dataset token: {source}"))]
    InvalidBase64 { source: base64::DecodeError },

    /// The decoded bytes were not valid UTF-8.
    #[snafu(display("dataset token did not decode to UTF-8: {source}"))]
    InvalidUtf8 { source: std::string::FromUtf8Error },

    /// The decoded string did not round-trip through a URL parser.
    #[snafu(display("dataset token is not a valid URL: {source}"))]
    InvalidUrl { source: url::ParseError },
}

/// Encode a dataset URL as an unpadded, URL-safe base64 token.
pub fn dataset_encode(url: &str) -> String {
    base64::encode_config(url.as_bytes(), base64::URL_SAFE_NO_PAD)
}

/// Decode a dataset token back into its URL, validating that it round-trips
/// through a URL parser.
pub fn dataset_decode(token: &str) -> Result<String, DatasetDecodeError> {
    let bytes = base64::decode_config(token, base64::URL_SAFE_NO_PAD).context(InvalidBase64Snafu)?;
    let url = String::from_utf8(bytes).context(InvalidUtf8Snafu)?;
    url::Url::parse(&url).context(InvalidUrlSnafu)?;
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_base64_and_url_parse() {
        let url = "https://archive.example.com/datasets/eth-mainnet";
        let token = dataset_encode(url);
        assert!(!token.contains('='), "token must be unpadded: {token}");
        assert_eq!(dataset_decode(&token).unwrap(), url);
    }

    #[test]
    fn rejects_non_url_payload() {
        let token = base64::encode_config("not a url", base64::URL_SAFE_NO_PAD);
        assert!(dataset_decode(&token).is_err());
    }

    #[test]
    fn rejects_garbage_base64() {
        assert!(dataset_decode("%%%not-base64%%%").is_err());
    }
}
