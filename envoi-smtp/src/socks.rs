//! SOCKS5 CONNECT (RFC 1928) with optional username/password
//! authentication (RFC 1929).

use std::net::IpAddr;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use crate::error::DialError;

const VERSION: u8 = 0x05;
const NO_AUTH: u8 = 0x00;
const USER_PASS: u8 = 0x02;
const NO_ACCEPTABLE: u8 = 0xFF;
const CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Credentials for proxy authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

fn proxy_err(reason: impl Into<String>) -> DialError {
    DialError::Proxy(reason.into())
}

fn field_len(field: &str, what: &str) -> Result<u8, DialError> {
    u8::try_from(field.len()).map_err(|_| proxy_err(format!("{what} longer than 255 bytes")))
}

/// Ask the proxy on `stream` to open a tunnel to `host:port`.
///
/// # Errors
///
/// Returns [`DialError::Proxy`] if the proxy refuses the request or speaks
/// something other than SOCKS5.
pub async fn connect(
    stream: &mut TcpStream,
    host: &str,
    port: u16,
    credentials: Option<&Credentials>,
) -> Result<(), DialError> {
    let mut greeting = vec![VERSION, 1, NO_AUTH];
    if credentials.is_some() {
        greeting[1] = 2;
        greeting.push(USER_PASS);
    }
    stream.write_all(&greeting).await?;

    let mut response = [0; 2];
    stream.read_exact(&mut response).await?;
    if response[0] != VERSION {
        return Err(proxy_err("invalid SOCKS5 response"));
    }

    match (response[1], credentials) {
        (NO_AUTH, _) => {}
        (USER_PASS, Some(credentials)) => authenticate(stream, credentials).await?,
        (USER_PASS, None) => {
            return Err(proxy_err(
                "authentication required but no credentials provided",
            ));
        }
        (NO_ACCEPTABLE, _) => return Err(proxy_err("no acceptable authentication methods")),
        (method, _) => return Err(proxy_err(format!("unsupported auth method {method}"))),
    }

    let mut request = vec![VERSION, CONNECT, 0x00];
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            request.push(ATYP_IPV4);
            request.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            request.push(ATYP_IPV6);
            request.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            request.push(ATYP_DOMAIN);
            request.push(field_len(host, "host name")?);
            request.extend_from_slice(host.as_bytes());
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut reply = [0; 4];
    stream.read_exact(&mut reply).await?;
    if reply[1] != 0x00 {
        return Err(proxy_err(format!("CONNECT failed: reply code {}", reply[1])));
    }

    // Discard the bound address and port.
    let skip = match reply[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let mut len = [0; 1];
            stream.read_exact(&mut len).await?;
            usize::from(len[0])
        }
        other => return Err(proxy_err(format!("unknown address type {other}"))),
    };
    let mut bound = vec![0; skip + 2];
    stream.read_exact(&mut bound).await?;

    Ok(())
}

async fn authenticate(stream: &mut TcpStream, credentials: &Credentials) -> Result<(), DialError> {
    let mut request = vec![0x01, field_len(&credentials.username, "username")?];
    request.extend_from_slice(credentials.username.as_bytes());
    request.push(field_len(&credentials.password, "password")?);
    request.extend_from_slice(credentials.password.as_bytes());
    stream.write_all(&request).await?;

    let mut response = [0; 2];
    stream.read_exact(&mut response).await?;
    if response[1] != 0x00 {
        return Err(proxy_err("authentication failed"));
    }
    Ok(())
}
