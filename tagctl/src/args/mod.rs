use {
    clap::Parser,
    p256::{ecdsa::SigningKey, elliptic_curve::sec1::ToEncodedPoint},
    sec1::der::{asn1::ObjectIdentifier, Decode, Encode},
    std::path::{Path, PathBuf},
    tag_protocol::{
        homomorphic::{scalar_from_bytes, HomomorphicEngine},
        issuer::{BaselineIssuer, StepAuthIssuer, TrackerAuthority},
        signature::IssuerKey,
        ReaderIdentity, Scheme, SchemeKind, SharedKey, TrackerUpdate,
    },
};

mod cli;
pub mod config;

pub use config::Error as ConfigError;

/// Named curve of the issuer key in SEC1 files.
const P256_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");

/// Program arguments loaded from the CLI and config files.
pub enum Args {
    /// Generate keys and config files.
    Provision(Provision),
    /// Write a fresh tag image.
    Issue {
        authority: Authority,
        tag: PathBuf,
        tag_id: u32,
        path: Vec<u32>,
        first_reader: Option<u32>,
        counter: Option<u64>,
        seed: Option<u64>,
    },
    /// Run one reader cycle.
    Scan {
        reader: Reader,
        tag: PathBuf,
        telemetry: Option<PathBuf>,
        screen: bool,
        seed: Option<u64>,
    },
    /// Check a tag at the manager.
    Verify {
        authority: Authority,
        tag: PathBuf,
        counter_bound: Option<u64>,
        max_tag_id: Option<u32>,
    },
    /// Dump the tag record fields to stdout.
    Dump { tag: PathBuf, scheme: SchemeKind },
    /// Decode telemetry frames.
    Telemetry { input: PathBuf },
}

#[derive(Debug, Clone)]
pub struct Provision {
    pub scheme: SchemeKind,
    pub readers: Vec<u32>,
    pub out: PathBuf,
    pub valid_paths: Vec<Vec<u32>>,
    pub counter_delta: Option<u64>,
    pub broker: Option<String>,
    pub wifi: Option<config::WifiConfig>,
    pub seed: Option<u64>,
}

/// Issuer or manager state loaded from `authority.toml`.
pub enum Authority {
    StepAuth(StepAuthIssuer),
    Baseline(BaselineIssuer),
    Tracker(TrackerAuthority),
}

impl Authority {
    pub fn kind(&self) -> SchemeKind {
        match self {
            Authority::StepAuth(_) => SchemeKind::StepAuth,
            Authority::Baseline(_) => SchemeKind::Baseline,
            Authority::Tracker(_) => SchemeKind::Tracker,
        }
    }
}

/// A provisioned reader loaded from its config file.
pub struct Reader {
    pub identity: ReaderIdentity,
    pub scheme: Scheme,
    pub mqtt: config::MqttConfig,
    pub wifi: Option<config::WifiConfig>,
}

pub fn args<I, T>(args: I) -> Result<Args, Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = cli::Args::try_parse_from(args).map_err(Error::Cli)?;
    match cli.command {
        cli::Command::Provision {
            scheme,
            readers,
            out,
            valid_paths,
            counter_delta,
            broker,
            wifi_ssid,
            wifi_password,
            seed,
        } => {
            let scheme = parse_scheme(&scheme)?;
            let valid_paths = valid_paths
                .iter()
                .map(String::as_str)
                .map(parse_path)
                .collect::<Result<Vec<_>, _>>()?;
            if let Some(path) = valid_paths
                .iter()
                .find(|path| path.iter().any(|id| !readers.contains(id)))
            {
                return Err(Error::UnknownPathReader(path.clone()));
            }
            if scheme != SchemeKind::Tracker && (!valid_paths.is_empty() || counter_delta.is_some())
            {
                return Err(Error::TrackerOptionForOtherScheme);
            }
            Ok(Args::Provision(Provision {
                scheme,
                readers,
                out,
                valid_paths,
                counter_delta,
                broker,
                wifi: wifi_ssid
                    .zip(wifi_password)
                    .map(|(ssid, password)| config::WifiConfig { ssid, password }),
                seed,
            }))
        }
        cli::Command::Issue {
            config,
            tag,
            tag_id,
            path,
            first_reader,
            counter,
            seed,
        } => Ok(Args::Issue {
            authority: load_authority(&config)?,
            tag,
            tag_id,
            path,
            first_reader,
            counter,
            seed,
        }),
        cli::Command::Scan {
            config,
            tag,
            telemetry,
            screen,
            seed,
        } => Ok(Args::Scan {
            reader: load_reader(&config)?,
            tag,
            telemetry,
            screen,
            seed,
        }),
        cli::Command::Verify {
            config,
            tag,
            counter_bound,
            max_tag_id,
        } => Ok(Args::Verify {
            authority: load_authority(&config)?,
            tag,
            counter_bound,
            max_tag_id,
        }),
        cli::Command::Dump { tag, scheme } => Ok(Args::Dump {
            tag,
            scheme: parse_scheme(&scheme)?,
        }),
        cli::Command::Telemetry { input } => Ok(Args::Telemetry { input }),
    }
}

fn parse_scheme(scheme: &str) -> Result<SchemeKind, Error> {
    match scheme {
        "stepauth" => Ok(SchemeKind::StepAuth),
        "baseline" => Ok(SchemeKind::Baseline),
        "tracker" => Ok(SchemeKind::Tracker),
        _ => Err(Error::InvalidScheme(scheme.to_owned())),
    }
}

fn parse_path(path: &str) -> Result<Vec<u32>, Error> {
    path.split(',')
        .map(|id| {
            id.trim()
                .parse()
                .map_err(|_| Error::InvalidPath(path.to_owned()))
        })
        .collect()
}

fn load_authority(path: &Path) -> Result<Authority, Error> {
    let config: config::AuthorityConfig = config::load(path)?;
    match config.scheme {
        SchemeKind::StepAuth => {
            let key_path = config
                .issuer_key
                .as_deref()
                .ok_or(Error::MissingField("issuer_key"))?;
            // Relative key paths are relative to the config file.
            let key_path = match path.parent() {
                Some(dir) if key_path.is_relative() => dir.join(key_path),
                _ => key_path.to_owned(),
            };
            let mut issuer = StepAuthIssuer::new(read_signing_key(&key_path)?);
            for reader in &config.readers {
                let key = required(&reader.shared_key, "readers.shared_key")?;
                issuer.add_reader(reader.id, parse_shared_key("readers.shared_key", key)?);
            }
            Ok(Authority::StepAuth(issuer))
        }
        SchemeKind::Baseline => {
            let key = required(&config.shared_key, "shared_key")?;
            Ok(Authority::Baseline(BaselineIssuer::new(parse_shared_key(
                "shared_key",
                key,
            )?)))
        }
        SchemeKind::Tracker => {
            let secrets = config.tracker.as_ref().ok_or(Error::MissingField("tracker"))?;
            let mut authority = TrackerAuthority::from_parts(
                &parse_bytes("tracker.secret", &secrets.secret)?,
                parse_shared_key("tracker.hash_key", &secrets.hash_key)?,
                &parse_bytes("tracker.x0", &secrets.x0)?,
                &parse_bytes("tracker.a0", &secrets.a0)?,
            )
            .map_err(|_| Error::InvalidTrackerSecret)?;
            for reader in &config.readers {
                let coefficient = required(&reader.coefficient, "readers.coefficient")?;
                authority.set_coefficient(
                    reader.id,
                    scalar_from_bytes(&parse_bytes("readers.coefficient", coefficient)?),
                );
            }
            for path in &config.valid_paths {
                authority
                    .add_valid_path(path)
                    .map_err(|_| Error::UnknownPathReader(path.clone()))?;
            }
            Ok(Authority::Tracker(authority))
        }
    }
}

fn load_reader(path: &Path) -> Result<Reader, Error> {
    let config: config::ReaderConfig = config::load(path)?;
    let identity = ReaderIdentity::new(config.id, &config.label)
        .map_err(|_| Error::LabelTooLong(config.label.clone()))?;
    let scheme = match config.scheme {
        SchemeKind::StepAuth => {
            let public_key = required(&config.issuer_public_key, "issuer_public_key")?;
            let public_key =
                hex::decode(public_key).map_err(|_| Error::InvalidHex("issuer_public_key"))?;
            Scheme::StepAuth {
                issuer_key: IssuerKey::from_sec1_bytes(&public_key)
                    .map_err(|_| Error::InvalidPublicKey("issuer_public_key"))?,
                shared_key: parse_shared_key(
                    "shared_key",
                    required(&config.shared_key, "shared_key")?,
                )?,
            }
        }
        SchemeKind::Baseline => Scheme::Baseline {
            shared_key: parse_shared_key("shared_key", required(&config.shared_key, "shared_key")?)?,
        },
        SchemeKind::Tracker => {
            let public_key = required(&config.tracker_public_key, "tracker_public_key")?;
            let public_key =
                hex::decode(public_key).map_err(|_| Error::InvalidHex("tracker_public_key"))?;
            let engine = HomomorphicEngine::from_sec1_bytes(&public_key)
                .map_err(|_| Error::InvalidPublicKey("tracker_public_key"))?;
            let update = match (&config.delta, &config.x0, &config.coefficient) {
                (Some(delta), _, _) => TrackerUpdate::Counter {
                    delta: scalar_from_bytes(&parse_bytes("delta", delta)?),
                },
                (None, Some(x0), Some(coefficient)) => TrackerUpdate::Path {
                    x0: scalar_from_bytes(&parse_bytes("x0", x0)?),
                    coefficient: scalar_from_bytes(&parse_bytes("coefficient", coefficient)?),
                },
                (None, None, _) => return Err(Error::MissingField("x0")),
                (None, Some(_), None) => return Err(Error::MissingField("coefficient")),
            };
            Scheme::Tracker { engine, update }
        }
    };
    Ok(Reader {
        identity,
        scheme,
        mqtt: config.mqtt,
        wifi: config.wifi,
    })
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, Error> {
    value.as_deref().ok_or(Error::MissingField(field))
}

fn parse_bytes<const N: usize>(field: &'static str, value: &str) -> Result<[u8; N], Error> {
    hex::decode(value)
        .map_err(|_| Error::InvalidHex(field))?
        .try_into()
        .map_err(|_| Error::InvalidLength(field))
}

fn parse_shared_key(field: &'static str, value: &str) -> Result<SharedKey, Error> {
    parse_bytes(field, value).map(SharedKey::new)
}

pub fn read_signing_key(path: &Path) -> Result<SigningKey, Error> {
    let pem = std::fs::read(path).map_err(Error::ReadPemFile)?;
    let key = pem::parse(pem)?;
    if key.tag() != "EC PRIVATE KEY" {
        return Err(Error::InvalidPemTag(key.tag().to_string()));
    }
    let secret = sec1::EcPrivateKey::from_der(key.contents())
        .map_err(Error::ParseDerContent)?
        .private_key;
    SigningKey::from_slice(secret).map_err(Error::InvalidSecretKey)
}

/// SEC1 PEM encoding of the issuer signing key, readable by
/// [`read_signing_key`].
pub fn signing_key_pem(key: &SigningKey) -> Result<String, Error> {
    let private_key = key.to_bytes();
    let public_key = key.verifying_key().as_affine().to_encoded_point(false);
    let der = sec1::EcPrivateKey {
        private_key: &private_key,
        parameters: Some(sec1::EcParameters::NamedCurve(P256_OID)),
        public_key: Some(public_key.as_bytes()),
    }
    .to_der()
    .map_err(Error::EncodeDerContent)?;
    Ok(pem::encode(&pem::Pem::new("EC PRIVATE KEY", der)))
}

#[derive(Debug)]
pub enum Error {
    Cli(clap::Error),
    Config(ConfigError),
    EncodeDerContent(sec1::der::Error),
    InvalidHex(&'static str),
    InvalidLength(&'static str),
    InvalidPath(String),
    InvalidPemTag(String),
    InvalidPublicKey(&'static str),
    InvalidScheme(String),
    InvalidSecretKey(p256::ecdsa::Error),
    InvalidTrackerSecret,
    LabelTooLong(String),
    MissingField(&'static str),
    ParseDerContent(sec1::der::Error),
    ParsePemFile(pem::PemError),
    ReadPemFile(std::io::Error),
    TrackerOptionForOtherScheme,
    UnknownPathReader(Vec<u32>),
}

impl From<pem::PemError> for Error {
    fn from(e: pem::PemError) -> Self {
        Error::ParsePemFile(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Cli(e) => write!(f, "{}", e.render().ansi()),
            Error::Config(e) => write!(f, "config error: {e}"),
            Error::EncodeDerContent(e) => write!(f, "failed to encode secret key: {e}"),
            Error::InvalidHex(field) => write!(f, "config error: {field} is not valid hex"),
            Error::InvalidLength(field) => write!(f, "config error: {field} has the wrong length"),
            Error::InvalidPath(path) => {
                write!(f, r#"user specified invalid path: "{path}""#)
            }
            Error::InvalidPemTag(tag) => {
                write!(f, r#"invalid PEM tag: "{tag}", expected "EC PRIVATE KEY""#)
            }
            Error::InvalidPublicKey(field) => {
                write!(f, "config error: {field} is not a valid P-256 point")
            }
            Error::InvalidScheme(scheme) => {
                write!(f, r#"user specified invalid scheme: "{scheme}""#)
            }
            Error::InvalidSecretKey(e) => write!(f, "invalid secret key: {e}"),
            Error::InvalidTrackerSecret => write!(f, "config error: invalid tracker secret"),
            Error::LabelTooLong(label) => {
                write!(f, r#"config error: reader label is too long: "{label}""#)
            }
            Error::MissingField(field) => write!(f, "config error: missing {field}"),
            Error::ParseDerContent(e) => {
                write!(f, "failed to parse DER content inside PEM file: {e}")
            }
            Error::ParsePemFile(e) => write!(f, "invalid PEM file: {e}"),
            Error::ReadPemFile(e) => write!(f, "failed to read PEM file: {e}"),
            Error::TrackerOptionForOtherScheme => {
                write!(f, "--valid-path and --counter-delta only apply to tracker")
            }
            Error::UnknownPathReader(path) => {
                write!(f, "path {path:?} names a reader that is not provisioned")
            }
        }
    }
}

impl std::error::Error for Error {}
