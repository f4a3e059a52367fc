use url::Url;

/// 安全连接的查询参数
const SECURE_QUERY_KEY: &str = "isSecure";

/// 根据是否安全返回协议名：`grpc` / `grpcs`
pub fn scheme(base: &str, secure: bool) -> String {
    if secure {
        format!("{base}s")
    } else {
        base.to_string()
    }
}

/// 构造对外公布的端点，例如 `grpc://127.0.0.1:9000?isSecure=false`
pub fn new_endpoint(base: &str, host: &str, secure: bool) -> Result<Url, url::ParseError> {
    Url::parse(&format!(
        "{base}://{host}?{SECURE_QUERY_KEY}={secure}"
    ))
}

/// 端点是否声明为安全连接：`grpcs` 协议或 `isSecure=true`
pub fn is_secure(endpoint: &Url, base: &str) -> bool {
    if endpoint.scheme() == scheme(base, true) {
        return true;
    }
    endpoint
        .query_pairs()
        .find(|(key, _)| key == SECURE_QUERY_KEY)
        .is_some_and(|(_, value)| value.eq_ignore_ascii_case("true"))
}

/// 从端点列表中选出第一个匹配协议与安全要求的地址（`host:port`）
///
/// 没有匹配时返回 `Ok(None)`，任一端点无法解析时返回错误。
pub fn parse_endpoint(
    endpoints: &[String],
    base: &str,
    secure: bool,
) -> Result<Option<String>, url::ParseError> {
    let secure_scheme = scheme(base, true);
    for raw in endpoints {
        let endpoint = Url::parse(raw)?;
        if endpoint.scheme() != base && endpoint.scheme() != secure_scheme {
            continue;
        }
        if is_secure(&endpoint, base) != secure {
            continue;
        }
        let Some(host) = endpoint.host_str() else {
            continue;
        };
        let address = match endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        return Ok(Some(address));
    }
    Ok(None)
}
