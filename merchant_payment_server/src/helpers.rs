//! Request helpers: externally visible host/prefix resolution, `taler://pay` URI construction and correlation id
//! extraction.

use actix_web::HttpRequest;

/// Maximum length accepted for a `Taler-Correlation-Id` header value.
const MAX_CORRELATION_ID_LEN: usize = 64;

/// The host clients used to reach us. Behind a reverse proxy this is `X-Forwarded-Host`; otherwise the plain
/// `Host` header. With forwarding disabled the `Host` header is read directly, because actix's connection info
/// honors `X-Forwarded-Host` on its own and would let clients spoof the host.
pub fn external_host(req: &HttpRequest, use_forwarded: bool) -> String {
    if use_forwarded {
        if let Some(host) = header_str(req, "X-Forwarded-Host") {
            return host.to_string();
        }
        return req.connection_info().host().to_string();
    }
    header_str(req, "Host")
        .map(str::to_string)
        .or_else(|| req.uri().host().map(str::to_string))
        .unwrap_or_else(|| req.app_config().host().to_string())
}

/// URL prefix under which a reverse proxy exposes us, with surrounding slashes stripped. `None` when we are
/// mounted at the root.
pub fn external_prefix(req: &HttpRequest, use_forwarded: bool) -> Option<String> {
    if !use_forwarded {
        return None;
    }
    header_str(req, "X-Forwarded-Prefix")
        .map(|p| p.trim_matches('/').to_string())
        .filter(|p| !p.is_empty())
}

/// Whether the client-facing side of the connection is plain HTTP. Wallets need to know, because `taler://pay`
/// URIs default to https.
pub fn external_is_insecure(req: &HttpRequest, use_forwarded: bool) -> bool {
    if use_forwarded {
        if let Some(proto) = header_str(req, "X-Forwarded-Proto") {
            return proto.eq_ignore_ascii_case("http");
        }
        return req.connection_info().scheme() == "http";
    }
    // Only what the listener itself knows; headers cannot upgrade or downgrade the scheme.
    !req.app_config().secure()
}

/// Build a `taler://pay` URI for the given order.
///
/// The path components are `host / prefix / instance / order_id [/ session_id]`, where an absent prefix and the
/// default instance are both rendered as `-`. Plain-http deployments are marked with `?insecure=1` so that wallets
/// do not attempt a TLS handshake.
pub fn make_pay_uri(
    host: &str,
    prefix: Option<&str>,
    instance_id: Option<&str>,
    order_id: &str,
    session_id: Option<&str>,
    insecure: bool,
) -> String {
    let prefix = prefix.filter(|p| !p.is_empty()).unwrap_or("-");
    let instance = instance_id.filter(|i| !i.is_empty() && *i != "default").unwrap_or("-");
    let mut uri = format!("taler://pay/{host}/{prefix}/{instance}/{order_id}");
    if let Some(session) = session_id.filter(|s| !s.is_empty()) {
        uri.push('/');
        uri.push_str(session);
    }
    if insecure {
        uri.push_str("?insecure=1");
    }
    uri
}

/// Pay URI as seen from the given request, honoring reverse-proxy headers when configured to.
pub fn pay_uri_for_request(
    req: &HttpRequest,
    use_forwarded: bool,
    instance_id: Option<&str>,
    order_id: &str,
    session_id: Option<&str>,
) -> String {
    let host = external_host(req, use_forwarded);
    let prefix = external_prefix(req, use_forwarded);
    let insecure = external_is_insecure(req, use_forwarded);
    make_pay_uri(&host, prefix.as_deref(), instance_id, order_id, session_id, insecure)
}

/// Correlation id supplied by the client, if it is present and sane. It is echoed on requests we make to the
/// exchange on the client's behalf.
pub fn correlation_id(req: &HttpRequest) -> Option<String> {
    let value = header_str(req, "Taler-Correlation-Id")?;
    let ok = !value.is_empty()
        && value.len() <= MAX_CORRELATION_ID_LEN
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    ok.then(|| value.to_string())
}

fn header_str<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}
