//! Component C8: the bind processor state machine (spec §4.8).
//!
//! Grounded in `ldap/servers/slapd/bind.c`: version checking, per-method
//! policy gates (anon access, unauthenticated binds, require-secure-binds,
//! minssf/minssf-exclude-rootdse, force-sasl-external), the root-DN
//! shortcut bind, SASL_CONTINUE clearing on any non-SASL bind, and routing
//! everything else to the backend's `be_bind`.

use crate::backend::BindBackend;
use crate::config::{AnonAccess, FrontendConfig};
use crate::conn::{AuthState, Connection};
use crate::protocol::message::{AuthChoice, BindRequest};
use crate::protocol::result::{LdapResult, ResultCode};
use crate::sasl::{SaslExchange, SaslStep};
use crate::time::Counters;

/// Outcome of processing one `BindRequest`, including whatever the
/// connection's `AuthState` becomes next.
pub struct BindOutcome {
    pub result: LdapResult,
    pub new_auth: Option<AuthState>,
    /// Set when a SASL exchange needs another round; the caller stores
    /// this on the connection for the next bind with the same mechanism.
    pub continue_exchange: Option<SaslExchange>,
    /// A SASL challenge to carry in `BindResponse.serverSaslCreds [7]`
    /// (RFC 4511 §4.2.3) — never a response control.
    pub server_sasl_creds: Option<Vec<u8>>,
}

impl BindOutcome {
    fn simple_error(rc: ResultCode, text: &str) -> BindOutcome {
        BindOutcome { result: LdapResult::error(rc, text), new_auth: None, continue_exchange: None, server_sasl_creds: None }
    }
}

pub struct BindProcessor<'a> {
    pub config: &'a FrontendConfig,
    pub backend: &'a dyn BindBackend,
    pub counters: &'a Counters,
    /// The mechanism set a SASL bind may start a fresh exchange against.
    /// `None` disables SASL binds entirely (every mechanism name is
    /// reported as unsupported), which a deployment with no SASL
    /// configuration at all is free to do.
    pub sasl: Option<&'a rsasl::prelude::SASLServer<()>>,
}

impl<'a> BindProcessor<'a> {
    /// Process one `BindRequest` against the connection's current state.
    /// `existing_exchange` is the in-progress SASL session carried over
    /// from a prior `saslBindInProgress`, if any.
    pub fn process(
        &self,
        conn: &Connection,
        req: BindRequest,
        existing_exchange: Option<SaslExchange>,
    ) -> BindOutcome {
        if req.version != 3 {
            self.counters.bind_security_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return BindOutcome::simple_error(ResultCode::ProtocolError, "unsupported LDAP protocol version");
        }

        if self.config.force_sasl_external && !matches!(req.auth, AuthChoice::Sasl { ref mech, .. } if mech == "EXTERNAL") {
            return BindOutcome::simple_error(ResultCode::StrongerAuthRequired, "SASL EXTERNAL bind is required");
        }

        match req.auth {
            AuthChoice::Simple(ref pw) => self.process_simple(conn, req.name.as_str(), pw),
            AuthChoice::Sasl { ref mech, .. } if mech == "EXTERNAL" => self.process_sasl_external(conn, req.name.as_str()),
            AuthChoice::Sasl { ref mech, ref creds } => self.process_sasl(mech.as_str(), creds.as_deref(), existing_exchange),
        }
    }

    fn process_simple(&self, conn: &Connection, name: &str, pw: &[u8]) -> BindOutcome {
        self.counters.simple_binds.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        // spec §4.8: min-ssf applies to SIMPLE binds unless deferred to the
        // dispatcher for root-DSE-only searches.
        if !self.config.minssf_exclude_rootdse && conn.effective_ssf() < self.config.min_ssf {
            self.counters.bind_security_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return BindOutcome::simple_error(ResultCode::ConfidentialityRequired, "minimum SSF not met");
        }

        if name.is_empty() && pw.is_empty() {
            return match self.config.anon_access {
                AnonAccess::Off => {
                    self.counters.bind_security_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    BindOutcome::simple_error(ResultCode::InappropriateAuthentication, "Anonymous access is not allowed")
                }
                _ => {
                    self.counters.anonymous_binds.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    BindOutcome {
                        result: LdapResult::success(),
                        new_auth: Some(AuthState::Anonymous),
                        continue_exchange: None,
                        server_sasl_creds: None,
                    }
                }
            };
        }

        if pw.is_empty() {
            // spec §4.8: unauthenticated bind — anon-access must allow it,
            // and unauth-binds-allowed must be separately on.
            if self.config.anon_access != AnonAccess::On {
                self.counters.bind_security_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return BindOutcome::simple_error(ResultCode::InappropriateAuthentication, "Anonymous access is not allowed");
            }
            if !self.config.allow_unauthenticated_binds {
                return BindOutcome::simple_error(ResultCode::UnwillingToPerform, "unauthenticated binds are disabled");
            }
            self.counters.unauth_binds.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return BindOutcome { result: LdapResult::success(), new_auth: Some(AuthState::Anonymous), continue_exchange: None, server_sasl_creds: None };
        }

        // spec §4.8: a non-empty password on an insecure channel is fatal
        // to the bind only when the server requires secure binds.
        if self.config.require_secure_binds && conn.effective_ssf() == 0 {
            return BindOutcome::simple_error(ResultCode::ConfidentialityRequired, "operation requires a secure connection");
        }

        if name.eq_ignore_ascii_case(&self.config.root_dn) {
            return match &self.config.root_pw {
                Some(root_pw) if root_pw.as_bytes() == pw => BindOutcome {
                    result: LdapResult::success(),
                    new_auth: Some(AuthState::Simple { dn: self.config.root_dn.clone() }),
                    continue_exchange: None,
                    server_sasl_creds: None,
                },
                _ => {
                    self.counters.bind_security_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    BindOutcome::simple_error(ResultCode::InvalidCredentials, "invalid credentials")
                }
            };
        }

        let result = self.backend.bind(name, &AuthChoice::Simple(pw.to_vec()));
        let new_auth = if result.rc == ResultCode::Success { Some(AuthState::Simple { dn: name.to_string() }) } else { None };
        if result.rc == ResultCode::Success {
            log::info!("bind dn=\"{name}\" method=simple result=success");
        } else {
            self.counters.bind_security_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            log::warn!("bind dn=\"{name}\" method=simple result={}", result.rc.description());
        }
        BindOutcome { result, new_auth, continue_exchange: None, server_sasl_creds: None }
    }

    fn process_sasl_external(&self, conn: &Connection, name: &str) -> BindOutcome {
        // spec §4.8: EXTERNAL requires a secure channel — a TLS handshake,
        // or a trusted local (AF_UNIX peer-credential) autobind.
        if conn.io.ssf_ssl == 0 && conn.local_autobind_dn.is_none() {
            self.counters.bind_security_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return BindOutcome::simple_error(ResultCode::InappropriateAuthentication, "SASL EXTERNAL requires a TLS connection");
        }

        #[cfg(feature = "tls")]
        let peer_cert_dn = conn.peer_cert_dn();
        #[cfg(not(feature = "tls"))]
        let peer_cert_dn: Option<String> = None;

        let dn = match conn.local_autobind_dn.as_deref() {
            Some(dn) => dn.to_string(),
            None if !name.is_empty() => name.to_string(),
            None => match peer_cert_dn {
                Some(dn) => dn,
                None => {
                    self.counters.bind_security_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    return BindOutcome::simple_error(ResultCode::InvalidCredentials, "no external identity available");
                }
            },
        };
        self.counters.strong_binds.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        BindOutcome {
            result: LdapResult::success(),
            new_auth: Some(AuthState::SaslExternal { dn }),
            continue_exchange: None,
            server_sasl_creds: None,
        }
    }

    fn process_sasl(&self, mech: &str, creds: Option<&[u8]>, existing: Option<SaslExchange>) -> BindOutcome {
        let mut exchange = match existing {
            Some(e) => e,
            None => match self.mk_exchange(mech) {
                Ok(e) => e,
                Err(()) => return BindOutcome::simple_error(ResultCode::AuthMethodNotSupported, "unsupported SASL mechanism"),
            },
        };
        match exchange.step(creds) {
            Ok(SaslStep::Continue(challenge)) => BindOutcome {
                result: LdapResult::error(ResultCode::SaslBindInProgress, ""),
                new_auth: Some(AuthState::SaslInProgress { mechanism: mech.to_string() }),
                continue_exchange: Some(exchange),
                server_sasl_creds: Some(challenge),
            },
            Ok(SaslStep::Done { authzid, .. }) => {
                self.counters.strong_binds.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                BindOutcome {
                    result: LdapResult::success(),
                    new_auth: Some(AuthState::Sasl { dn: authzid, mechanism: mech.to_string() }),
                    continue_exchange: None,
                    server_sasl_creds: None,
                }
            }
            Err(_) => BindOutcome::simple_error(ResultCode::InvalidCredentials, "SASL negotiation failed"),
        }
    }

    fn mk_exchange(&self, mech: &str) -> Result<SaslExchange, ()> {
        let sasl = self.sasl.ok_or(())?;
        SaslExchange::new(sasl, mech).map_err(|_| ())
    }
}

/// Whether any bind that is not SASL must clear the connection's
/// SASL_CONTINUE flag (`bind.c`: confirmed unconditional).
pub fn clears_sasl_continue(auth: &AuthChoice) -> bool {
    !matches!(auth, AuthChoice::Sasl { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrontendConfig;
    use std::net::{TcpListener, TcpStream};

    struct AlwaysFail;
    impl BindBackend for AlwaysFail {
        fn bind(&self, _dn: &str, _auth: &AuthChoice) -> LdapResult {
            LdapResult::error(ResultCode::InvalidCredentials, "nope")
        }
    }

    fn test_conn() -> Connection {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        Connection::new(1, server, client.peer_addr().unwrap(), client.local_addr().unwrap())
    }

    #[test]
    fn anonymous_bind_succeeds_when_allowed() {
        let config = FrontendConfig::default();
        let backend = AlwaysFail;
        let counters = Counters::new();
        let processor = BindProcessor { config: &config, backend: &backend, counters: &counters, sasl: None };
        let conn = test_conn();
        let req = BindRequest { version: 3, name: String::new(), auth: AuthChoice::Simple(Vec::new()) };
        let outcome = processor.process(&conn, req, None);
        assert_eq!(outcome.result.rc, ResultCode::Success);
        assert!(matches!(outcome.new_auth, Some(AuthState::Anonymous)));
    }

    #[test]
    fn anonymous_bind_is_rejected_when_access_is_off() {
        let mut config = FrontendConfig::default();
        config.anon_access = AnonAccess::Off;
        let backend = AlwaysFail;
        let counters = Counters::new();
        let processor = BindProcessor { config: &config, backend: &backend, counters: &counters, sasl: None };
        let conn = test_conn();
        let req = BindRequest { version: 3, name: String::new(), auth: AuthChoice::Simple(Vec::new()) };
        let outcome = processor.process(&conn, req, None);
        assert_eq!(outcome.result.rc, ResultCode::InappropriateAuthentication);
        assert!(outcome.result.text.contains("Anonymous access"));
        assert_eq!(counters.bind_security_errors.load(std::sync::atomic::Ordering::Relaxed), 1);
        assert_eq!(counters.anonymous_binds.load(std::sync::atomic::Ordering::Relaxed), 0);
    }

    #[test]
    fn unauthenticated_bind_requires_anon_access_on_and_the_unauth_flag() {
        let mut config = FrontendConfig::default();
        config.anon_access = AnonAccess::On;
        config.allow_unauthenticated_binds = false;
        let backend = AlwaysFail;
        let counters = Counters::new();
        let processor = BindProcessor { config: &config, backend: &backend, counters: &counters, sasl: None };
        let conn = test_conn();
        let req = BindRequest { version: 3, name: "cn=someone,dc=example".to_string(), auth: AuthChoice::Simple(Vec::new()) };
        let outcome = processor.process(&conn, req, None);
        assert_eq!(outcome.result.rc, ResultCode::UnwillingToPerform);
    }

    #[test]
    fn unauthenticated_bind_rejected_when_anon_access_is_rootdse_only() {
        let mut config = FrontendConfig::default();
        config.anon_access = AnonAccess::RootDse;
        config.allow_unauthenticated_binds = true;
        let backend = AlwaysFail;
        let counters = Counters::new();
        let processor = BindProcessor { config: &config, backend: &backend, counters: &counters, sasl: None };
        let conn = test_conn();
        let req = BindRequest { version: 3, name: "cn=someone,dc=example".to_string(), auth: AuthChoice::Simple(Vec::new()) };
        let outcome = processor.process(&conn, req, None);
        assert_eq!(outcome.result.rc, ResultCode::InappropriateAuthentication);
    }

    #[test]
    fn nonempty_password_over_plaintext_is_rejected_when_secure_binds_required() {
        let mut config = FrontendConfig::default();
        config.require_secure_binds = true;
        let backend = AlwaysFail;
        let counters = Counters::new();
        let processor = BindProcessor { config: &config, backend: &backend, counters: &counters, sasl: None };
        let conn = test_conn();
        let req = BindRequest { version: 3, name: "cn=someone,dc=example".to_string(), auth: AuthChoice::Simple(b"secret".to_vec()) };
        let outcome = processor.process(&conn, req, None);
        assert_eq!(outcome.result.rc, ResultCode::ConfidentialityRequired);
    }

    #[test]
    fn simple_bind_blocked_below_minssf() {
        let mut config = FrontendConfig::default();
        config.min_ssf = 128;
        let backend = AlwaysFail;
        let counters = Counters::new();
        let processor = BindProcessor { config: &config, backend: &backend, counters: &counters, sasl: None };
        let conn = test_conn();
        let req = BindRequest { version: 3, name: "cn=someone,dc=example".to_string(), auth: AuthChoice::Simple(b"secret".to_vec()) };
        let outcome = processor.process(&conn, req, None);
        assert_eq!(outcome.result.rc, ResultCode::ConfidentialityRequired);
        assert_eq!(counters.bind_security_errors.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn sasl_external_without_tls_or_autobind_is_rejected() {
        let config = FrontendConfig::default();
        let backend = AlwaysFail;
        let counters = Counters::new();
        let processor = BindProcessor { config: &config, backend: &backend, counters: &counters, sasl: None };
        let conn = test_conn();
        let req = BindRequest { version: 3, name: String::new(), auth: AuthChoice::Sasl { mech: "EXTERNAL".to_string(), creds: None } };
        let outcome = processor.process(&conn, req, None);
        assert_eq!(outcome.result.rc, ResultCode::InappropriateAuthentication);
    }

    #[test]
    fn root_dn_shortcut_bypasses_the_backend() {
        let mut config = FrontendConfig::default();
        config.root_pw = Some("topsecret".to_string());
        let backend = AlwaysFail;
        let counters = Counters::new();
        let processor = BindProcessor { config: &config, backend: &backend, counters: &counters, sasl: None };
        let conn = test_conn();
        let req = BindRequest {
            version: 3,
            name: config.root_dn.clone(),
            auth: AuthChoice::Simple(b"topsecret".to_vec()),
        };
        let outcome = processor.process(&conn, req, None);
        assert_eq!(outcome.result.rc, ResultCode::Success);
    }

    #[test]
    fn v2_bind_is_rejected_uniformly() {
        let config = FrontendConfig::default();
        let backend = AlwaysFail;
        let counters = Counters::new();
        let processor = BindProcessor { config: &config, backend: &backend, counters: &counters, sasl: None };
        let conn = test_conn();
        let req = BindRequest { version: 2, name: "cn=x".to_string(), auth: AuthChoice::Simple(b"y".to_vec()) };
        let outcome = processor.process(&conn, req, None);
        assert_eq!(outcome.result.rc, ResultCode::ProtocolError);
    }

    #[test]
    fn clears_sasl_continue_for_simple_but_not_sasl() {
        assert!(clears_sasl_continue(&AuthChoice::Simple(Vec::new())));
        assert!(!clears_sasl_continue(&AuthChoice::Sasl { mech: "EXTERNAL".to_string(), creds: None }));
    }
}
