use crate::cgi::CgiRequest;
use crate::http::connection::SERVER_HEADER;

const SAFE_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// CGI/1.1 meta-variables for one invocation, built only from the request.
pub fn build(job: &CgiRequest<'_>) -> Vec<(String, String)> {
    let request = job.request;
    let server_name = if job.server.server_name.is_empty() {
        request.host().unwrap_or("localhost").to_string()
    } else {
        job.server.server_name.clone()
    };
    let server_port = job
        .server
        .addrs()
        .first()
        .map(|a| a.port().to_string())
        .unwrap_or_default();

    let mut env = vec![
        ("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string()),
        ("SERVER_SOFTWARE".to_string(), SERVER_HEADER.to_string()),
        ("SERVER_NAME".to_string(), server_name),
        ("SERVER_PORT".to_string(), server_port),
        ("SERVER_PROTOCOL".to_string(), request.version.as_str().to_string()),
        ("REQUEST_METHOD".to_string(), request.method.as_str().to_string()),
        ("REQUEST_URI".to_string(), request.target.clone()),
        ("QUERY_STRING".to_string(), request.query.clone()),
        ("SCRIPT_NAME".to_string(), job.script_name.to_string()),
        ("SCRIPT_FILENAME".to_string(), job.script.display().to_string()),
        ("PATH_INFO".to_string(), job.path_info.to_string()),
        ("DOCUMENT_ROOT".to_string(), job.document_root.display().to_string()),
        ("REMOTE_ADDR".to_string(), job.peer.ip().to_string()),
        ("REMOTE_PORT".to_string(), job.peer.port().to_string()),
        ("CONTENT_LENGTH".to_string(), request.body.len().to_string()),
        ("REDIRECT_STATUS".to_string(), "200".to_string()),
        ("PATH".to_string(), SAFE_PATH.to_string()),
    ];
    if let Some(ct) = request.content_type() {
        env.push(("CONTENT_TYPE".to_string(), ct.to_string()));
    }

    for (name, value) in request.headers.iter() {
        if name.eq_ignore_ascii_case("Content-Type") || name.eq_ignore_ascii_case("Content-Length")
        {
            continue;
        }
        env.push((meta_name(name), value.to_string()));
    }
    env
}

/// `X-Forwarded-For` -> `HTTP_X_FORWARDED_FOR`
fn meta_name(header: &str) -> String {
    let mut name = String::with_capacity(header.len() + 5);
    name.push_str("HTTP_");
    name.extend(header.chars().map(|c| {
        if c.is_ascii_alphanumeric() {
            c.to_ascii_uppercase()
        } else {
            '_'
        }
    }));
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_names_become_meta_variables() {
        assert_eq!(meta_name("X-Forwarded-For"), "HTTP_X_FORWARDED_FOR");
        assert_eq!(meta_name("accept"), "HTTP_ACCEPT");
    }
}
