//! TLS client-certificate DN extraction, for SASL EXTERNAL over TLS (spec
//! §4.8: `process_sasl_external` falls back to the certificate's subject DN
//! when the bind request carries no SASL authzid).
//!
//! `native-tls` (the teacher's TLS dependency, used in `io_layer.rs`) hands
//! back only the DER bytes of the peer certificate; parsing the subject out
//! of that DER needs `x509-parser`, which the teacher also already declares.

use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::{FrontendError, Result};

/// Parse a peer certificate's subject into an RFC 4514 DN string, escaping
/// each RDN value with [`crate::util::dn_escape`].
pub fn subject_dn(der: &[u8]) -> Result<String> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| FrontendError::Tls(native_tls_placeholder(&e.to_string())))?;
    let mut rdns = Vec::new();
    for rdn in cert.subject().iter_rdn() {
        for attr in rdn.iter() {
            let short_name = attr.attr_type().to_id_string();
            let value = attr.as_str().map(|s| s.to_string()).unwrap_or_else(|_| {
                attr.as_slice().iter().map(|b| format!("{b:02x}")).collect::<String>()
            });
            rdns.push(format!("{short_name}={}", crate::util::dn_escape(value)));
        }
    }
    Ok(rdns.join(","))
}

fn native_tls_placeholder(msg: &str) -> native_tls::Error {
    native_tls::Error::from(std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string()))
}
