use std::{io::Write, net::IpAddr, ops::Range};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use flate2::{write::ZlibEncoder, Compression};
use thiserror::Error;

pub const SCHEME: &str = "vpn://";

const COMPRESSION_LEVEL: u32 = 8;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("could not resolve endpoint host {0}")]
    Unresolved(String),
    #[error("compression error: {0}")]
    Io(#[from] std::io::Error),
}

/// Forward DNS, the one effectful step of the encoder. A seam so the
/// rewrite rules stay testable without the network.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str) -> Option<IpAddr>;
}

pub struct DnsResolver;

#[async_trait]
impl Resolver for DnsResolver {
    async fn resolve(&self, host: &str) -> Option<IpAddr> {
        let addrs: Vec<_> = tokio::net::lookup_host((host, 0u16)).await.ok()?.collect();

        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .map(|a| a.ip())
    }
}

/// `Endpoint` directive on a physical line: arbitrary prefix, the label,
/// `=` with optional surrounding whitespace, a host with no colon or
/// whitespace in it, a mandatory `:port`, and an arbitrary suffix. Returns
/// the host's byte range. The rightmost label that parses wins.
fn endpoint_host_span(line: &str) -> Option<Range<usize>> {
    const LABEL: &str = "Endpoint";
    let bytes = line.as_bytes();
    let mut search_end = line.len();

    while let Some(pos) = line[..search_end].rfind(LABEL) {
        search_end = pos;

        let mut i = pos + LABEL.len();
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] != b'=' {
            continue;
        }
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }

        let host_start = i;
        while i < bytes.len() && bytes[i] != b':' && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i == host_start || i >= bytes.len() || bytes[i] != b':' {
            continue;
        }
        let host_end = i;

        i += 1;
        let port_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == port_start {
            continue;
        }

        return Some(host_start..host_end);
    }

    None
}

async fn rewrite_line<R: Resolver + ?Sized>(
    line: &str,
    resolver: &R,
) -> Result<String, EncodeError> {
    let span = match endpoint_host_span(line) {
        Some(span) => span,
        None => return Ok(line.to_owned()),
    };

    let host = &line[span.clone()];
    if host.parse::<IpAddr>().is_ok() {
        return Ok(line.to_owned());
    }

    let ip = resolver
        .resolve(host)
        .await
        .ok_or_else(|| EncodeError::Unresolved(host.to_owned()))?;

    let mut rewritten = String::with_capacity(line.len());
    rewritten.push_str(&line[..span.start]);
    rewritten.push_str(&ip.to_string());
    rewritten.push_str(&line[span.end..]);
    Ok(rewritten)
}

/// Replaces every DNS-name endpoint host with its resolved address,
/// preserving each line's other bytes verbatim. A single unresolvable host
/// fails the whole pass.
pub async fn rewrite_endpoints<R: Resolver + ?Sized>(
    text: &str,
    resolver: &R,
) -> Result<String, EncodeError> {
    let mut lines = Vec::new();
    for line in text.split('\n') {
        lines.push(rewrite_line(line, resolver).await?);
    }

    Ok(lines.join("\n"))
}

// Container framing: 4-byte big-endian uncompressed length, then the zlib
// stream. Must stay bit-exact for the deployed decoder.
fn pack(data: &[u8]) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::with_capacity(data.len() / 2 + 8);
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());

    let mut encoder = ZlibEncoder::new(out, Compression::new(COMPRESSION_LEVEL));
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub async fn encode_vpn_conf<R: Resolver + ?Sized>(
    conf: &str,
    resolver: &R,
) -> Result<String, EncodeError> {
    let rewritten = rewrite_endpoints(conf, resolver).await?;
    let packed = pack(rewritten.as_bytes())?;

    Ok(format!("{}{}", SCHEME, URL_SAFE_NO_PAD.encode(packed)))
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, io::Read, net::Ipv4Addr};

    use super::*;

    struct StaticResolver(HashMap<&'static str, IpAddr>);

    impl StaticResolver {
        fn with(host: &'static str, ip: [u8; 4]) -> Self {
            let mut map = HashMap::new();
            map.insert(host, IpAddr::V4(Ipv4Addr::from(ip)));
            Self(map)
        }

        fn empty() -> Self {
            Self(HashMap::new())
        }
    }

    #[async_trait]
    impl Resolver for StaticResolver {
        async fn resolve(&self, host: &str) -> Option<IpAddr> {
            self.0.get(host).copied()
        }
    }

    fn unpack(uri: &str) -> Vec<u8> {
        let payload = uri.strip_prefix(SCHEME).unwrap();
        let container = URL_SAFE_NO_PAD.decode(payload).unwrap();
        let (header, body) = container.split_at(4);

        let mut out = Vec::new();
        flate2::read::ZlibDecoder::new(body)
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(
            u32::from_be_bytes(header.try_into().unwrap()) as usize,
            out.len()
        );
        out
    }

    #[tokio::test]
    async fn literal_ipv4_endpoint_is_untouched() {
        let text = "Endpoint = 198.51.100.1:51820\n";
        let out = rewrite_endpoints(text, &StaticResolver::empty()).await.unwrap();
        assert_eq!(out, text);
    }

    #[tokio::test]
    async fn dns_endpoint_is_rewritten_in_place() {
        let resolver = StaticResolver::with("example.com", [203, 0, 113, 5]);
        let out = rewrite_endpoints("  Endpoint = example.com:51820 # primary", &resolver)
            .await
            .unwrap();
        assert_eq!(out, "  Endpoint = 203.0.113.5:51820 # primary");
    }

    #[tokio::test]
    async fn unresolvable_endpoint_fails_the_whole_encode() {
        let err = encode_vpn_conf("Endpoint = nowhere.invalid:51820\n", &StaticResolver::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, EncodeError::Unresolved(ref h) if h == "nowhere.invalid"));
    }

    #[tokio::test]
    async fn lines_without_a_port_pass_through() {
        let text = "Endpoint = example.com\nAddress = 10.8.1.2/32";
        let out = rewrite_endpoints(text, &StaticResolver::empty()).await.unwrap();
        assert_eq!(out, text);
    }

    #[tokio::test]
    async fn encoding_is_deterministic() {
        let resolver = StaticResolver::with("example.com", [203, 0, 113, 5]);
        let text = "[Peer]\nEndpoint = example.com:51820\n";
        let a = encode_vpn_conf(text, &resolver).await.unwrap();
        let b = encode_vpn_conf(text, &resolver).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn uri_has_the_scheme_and_no_padding() {
        let uri = encode_vpn_conf("Endpoint = 198.51.100.1:51820\n", &StaticResolver::empty())
            .await
            .unwrap();
        assert!(uri.starts_with(SCHEME));
        assert!(!uri.contains('='));
    }

    #[tokio::test]
    async fn payload_contains_resolved_endpoint_end_to_end() {
        let resolver = StaticResolver::with("example.com", [203, 0, 113, 5]);
        let text = "[Peer]\nEndpoint = example.com:51820\nPersistentKeepalive = 25\n";

        let uri = encode_vpn_conf(text, &resolver).await.unwrap();
        let payload = String::from_utf8(unpack(&uri)).unwrap();

        assert!(payload.contains("Endpoint = 203.0.113.5:51820"));
        assert!(!payload.contains("example.com"));
        assert!(payload.contains("PersistentKeepalive = 25"));
    }

    #[test]
    fn container_header_is_the_uncompressed_length() {
        let data = b"[Interface]\nAddress = 10.8.1.2/32\n";
        let packed = pack(data).unwrap();
        assert_eq!(&packed[..4], &(data.len() as u32).to_be_bytes());

        let mut out = Vec::new();
        flate2::read::ZlibDecoder::new(&packed[4..])
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn host_span_takes_the_rightmost_label() {
        let line = "# Endpoint docs: Endpoint = relay.example.org:443";
        let span = endpoint_host_span(line).unwrap();
        assert_eq!(&line[span], "relay.example.org");
    }

    #[test]
    fn host_span_rejects_hosts_with_whitespace() {
        assert!(endpoint_host_span("Endpoint = bad host:51820").is_none());
    }
}
