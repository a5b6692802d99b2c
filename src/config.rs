//! The `cn=config` surface this subsystem reads (spec §6). Loaded from a
//! handful of LDIF attributes in the front-end DSE tree (`dse.rs`); values
//! absent from the file fall back to these defaults.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnonAccess {
    Off,
    On,
    RootDse,
}

#[derive(Clone, Debug)]
pub struct FrontendConfig {
    pub port: u16,
    pub secure_port: Option<u16>,
    pub localhost: String,
    pub thread_number: usize,
    pub max_ber_size: u64,
    pub max_sasl_io_size: i64,
    pub ioblock_timeout: std::time::Duration,
    pub min_ssf: u32,
    pub minssf_exclude_rootdse: bool,
    pub anon_access: AnonAccess,
    pub allow_unauthenticated_binds: bool,
    pub require_secure_binds: bool,
    pub force_sasl_external: bool,
    pub root_dn: String,
    pub root_pw: Option<String>,
    pub dn_validate_strict: bool,
    pub haproxy_trusted_ips: Vec<String>,
    pub max_descriptors: u64,
    pub connection_table_size: usize,
}

impl Default for FrontendConfig {
    fn default() -> FrontendConfig {
        FrontendConfig {
            port: 389,
            secure_port: None,
            localhost: "localhost".to_string(),
            thread_number: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            max_ber_size: 2 * 1024 * 1024,
            max_sasl_io_size: -1,
            ioblock_timeout: std::time::Duration::from_secs(1),
            min_ssf: 0,
            minssf_exclude_rootdse: false,
            anon_access: AnonAccess::On,
            allow_unauthenticated_binds: false,
            require_secure_binds: false,
            force_sasl_external: false,
            root_dn: "cn=Directory Manager".to_string(),
            root_pw: None,
            dn_validate_strict: false,
            haproxy_trusted_ips: Vec::new(),
            max_descriptors: 1024,
            connection_table_size: 4096,
        }
    }
}

impl FrontendConfig {
    /// Apply one `cn=config` attribute/value pair, as read out of the DSE
    /// LDIF tree. Unknown attributes are ignored (the config entry also
    /// carries attributes owned by other subsystems).
    pub fn set_attr(&mut self, attr: &str, value: &str) {
        match attr.to_ascii_lowercase().as_str() {
            "nsslapd-port" => {
                if let Ok(v) = value.parse() {
                    self.port = v;
                }
            }
            "nsslapd-secureport" => self.secure_port = value.parse().ok(),
            "nsslapd-localhost" => self.localhost = value.to_string(),
            "nsslapd-threadnumber" => {
                if let Ok(v) = value.parse() {
                    self.thread_number = v;
                }
            }
            "nsslapd-maxbersize" => {
                if let Ok(v) = value.parse() {
                    self.max_ber_size = v;
                }
            }
            "nsslapd-maxsasliosize" => {
                if let Ok(v) = value.parse() {
                    self.max_sasl_io_size = v;
                }
            }
            "nsslapd-ioblocktimeout" => {
                if let Ok(ms) = value.parse() {
                    self.ioblock_timeout = std::time::Duration::from_millis(ms);
                }
            }
            "nsslapd-minssf" => {
                if let Ok(v) = value.parse() {
                    self.min_ssf = v;
                }
            }
            "nsslapd-minssf-exclude-rootdse" => self.minssf_exclude_rootdse = is_on(value),
            "nsslapd-allow-anonymous-access" => {
                self.anon_access = match value.to_ascii_lowercase().as_str() {
                    "off" => AnonAccess::Off,
                    "rootdse" => AnonAccess::RootDse,
                    _ => AnonAccess::On,
                };
            }
            "nsslapd-allow-unauthenticated-binds" => self.allow_unauthenticated_binds = is_on(value),
            "nsslapd-require-secure-binds" => self.require_secure_binds = is_on(value),
            "nsslapd-force-sasl-external" => self.force_sasl_external = is_on(value),
            "nsslapd-rootdn" => self.root_dn = value.to_string(),
            "nsslapd-rootpw" => self.root_pw = Some(value.to_string()),
            "nsslapd-dn-validate-strict" => self.dn_validate_strict = is_on(value),
            "nsslapd-haproxy-trusted-ip" => self.haproxy_trusted_ips.push(value.to_string()),
            "nsslapd-maxdescriptors" => {
                if let Ok(v) = value.parse() {
                    self.max_descriptors = v;
                }
            }
            _ => {}
        }
    }
}

fn is_on(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "on" | "true" | "1")
}
