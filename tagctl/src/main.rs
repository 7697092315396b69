use {
    args::config::{self, AuthorityConfig, ReaderConfig, ReaderEntry, TrackerSecrets},
    colored::Colorize,
    consts::{TELEMETRY_FRAME_SIZE, TELEMETRY_QUEUE_LEN},
    p256::{ecdsa::SigningKey, elliptic_curve::sec1::ToEncodedPoint, Scalar},
    rand::{rngs::StdRng, SeedableRng},
    std::{
        ffi::OsString,
        io::Write,
        path::{Path, PathBuf},
    },
    tag_protocol::{
        homomorphic::{encode_point, random_scalar, scalar_to_bytes},
        issuer::{generate_shared_key, TrackerAuthority, TrackerVerdict},
        record::{self, SignatureScheme},
        report::{ScreenSink, SerialSink, TelemetrySink},
        BytesQueue, Context, CycleReport, MemoryTag, Reporter, SchemeKind, TagRecord, TagUpdater,
        TrackerRecord,
    },
};

mod args;

#[cfg(test)]
mod tests;

type TelemetryQueue = BytesQueue<TELEMETRY_QUEUE_LEN, TELEMETRY_FRAME_SIZE>;

fn main() -> std::process::ExitCode {
    pretty_env_logger::init();
    main_args(
        std::env::args_os(),
        &mut std::io::stdout(),
        &mut std::io::stderr(),
    )
    .into()
}

fn main_args<I, T>(args: I, stdout: impl Write, mut stderr: impl Write) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match run(args, stdout) {
        Ok(()) => ExitCode(0),
        Err(Error::Args(e @ args::Error::Cli(_))) => {
            // Clap already does the "error: {}" formatting.
            writeln!(stderr, "{e}").expect("write error to stderr");
            ExitCode(1)
        }
        Err(e) => {
            writeln!(stderr, "{} {e}", "error:".bold().red()).expect("write error to stderr");
            ExitCode(1)
        }
    }
}

fn run<I, T>(args: I, mut stdout: impl Write) -> Result<(), Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match args::args(args)? {
        args::Args::Provision(provision) => {
            for path in provision_files(&provision)? {
                writeln!(&mut stdout, "{:10} {}", "wrote".bold(), path.display())
                    .map_err(Error::Stdout)?;
            }
        }
        args::Args::Issue {
            authority,
            tag,
            tag_id,
            path,
            first_reader,
            counter,
            seed,
        } => {
            let kind = authority.kind();
            if !path.is_empty() && kind != SchemeKind::StepAuth {
                return Err(Error::OptionForOtherScheme("--path", kind));
            }
            if first_reader.is_some() && kind != SchemeKind::Baseline {
                return Err(Error::OptionForOtherScheme("--first-reader", kind));
            }
            if counter.is_some() && kind != SchemeKind::Tracker {
                return Err(Error::OptionForOtherScheme("--counter", kind));
            }

            let mut rng = rng(seed);
            let content = match authority {
                args::Authority::StepAuth(issuer) => {
                    if path.is_empty() {
                        return Err(Error::PathMissing);
                    }
                    issuer.issue(tag_id, &path, &mut rng)?.to_vec()
                }
                args::Authority::Baseline(issuer) => {
                    issuer.issue(tag_id, first_reader, &mut rng)?.to_vec()
                }
                args::Authority::Tracker(authority) => match counter {
                    Some(value) => authority.issue_counter(tag_id, value, &mut rng)?,
                    None => authority.issue(tag_id, &mut rng)?,
                }
                .encode()
                .to_vec(),
            };
            let image = MemoryTag::with_content(&content)?;
            write_file(&tag, image.image()).map_err(Error::WriteTagFile)?;
            log::info!("issued {kind} tag {tag_id} to {}", tag.display());
            writeln!(
                &mut stdout,
                "{:10} {tag_id} ({kind}, {})",
                "issued".bold(),
                humansize::format_size(content.len(), humansize::BINARY),
            )
            .map_err(Error::Stdout)?;
        }
        args::Args::Scan {
            reader,
            tag,
            telemetry,
            screen,
            seed,
        } => {
            let image = std::fs::read(&tag).map_err(Error::ReadTagFile)?;
            let driver = MemoryTag::from_image(&image)?;
            let queue = TelemetryQueue::default();

            let mut serial = SerialSink::new(String::new());
            let mut display = ScreenSink::new(reader.scheme.kind());
            let mut uplink = TelemetrySink::new(&queue);
            let mut reporter = Reporter::new();
            reporter.attach(&mut serial)?;
            if screen {
                reporter.attach(&mut display)?;
            }
            if telemetry.is_some() {
                reporter.attach(&mut uplink)?;
            }

            let mut ctx = Context::new(driver, rng(seed), reporter)?;
            let mut updater = TagUpdater::new(reader.identity, reader.scheme);
            let report = updater.scan(&mut ctx);
            let (driver, _, _) = ctx.into_parts();
            log::debug!("cycle trace {:?}", updater.trace());

            if report.outcome.is_success() {
                write_file(&tag, driver.image()).map_err(Error::WriteTagFile)?;
            }

            write!(&mut stdout, "{}", serial.get_ref()).map_err(Error::Stdout)?;
            if screen {
                writeln!(&mut stdout, "{}", display.banner().bold()).map_err(Error::Stdout)?;
                for line in display.lines() {
                    writeln!(&mut stdout, "{line}").map_err(Error::Stdout)?;
                }
            }
            if let Some(path) = telemetry {
                if let Some(wifi) = &reader.wifi {
                    log::info!("telemetry over wifi {}", wifi.ssid);
                }
                log::info!(
                    "telemetry for {}:{} topic {}",
                    reader.mqtt.broker,
                    reader.mqtt.port,
                    reader.mqtt.topic,
                );
                append_telemetry(&queue, &path)?;
            }
        }
        args::Args::Verify {
            authority,
            tag,
            counter_bound,
            max_tag_id,
        } => {
            let image = std::fs::read(&tag).map_err(Error::ReadTagFile)?;
            let content = record::unframe(&image)?;
            match authority {
                args::Authority::StepAuth(issuer) => {
                    let readout = issuer.remaining_path(content)?;
                    writeln!(&mut stdout, "{:10} {}", "tag id".bold(), readout.tag_id)
                        .map_err(Error::Stdout)?;
                    if readout.remaining.is_empty() {
                        writeln!(&mut stdout, "{}", "path complete".bold().green())
                            .map_err(Error::Stdout)?;
                    } else {
                        writeln!(
                            &mut stdout,
                            "{:10} {}",
                            "remaining".bold(),
                            format_path(&readout.remaining),
                        )
                        .map_err(Error::Stdout)?;
                    }
                }
                args::Authority::Baseline(issuer) => {
                    let path = issuer.read_path(content)?;
                    writeln!(&mut stdout, "{:10} {}", "tag id".bold(), path.tag_id)
                        .map_err(Error::Stdout)?;
                    writeln!(
                        &mut stdout,
                        "{:10} {}",
                        "visited".bold(),
                        format_path(&path.visited),
                    )
                    .map_err(Error::Stdout)?;
                }
                args::Authority::Tracker(authority) => {
                    let record = TrackerRecord::decode(content)?;
                    verify_tracker(&authority, &record, counter_bound, max_tag_id, &mut stdout)?;
                }
            }
        }
        args::Args::Dump { tag, scheme } => {
            let image = std::fs::read(&tag).map_err(Error::ReadTagFile)?;
            let content = record::unframe(&image)?;
            writeln!(
                &mut stdout,
                "{:10} {} ({})",
                "length".bold(),
                humansize::format_size(content.len(), humansize::BINARY),
                content.len(),
            )
            .map_err(Error::Stdout)?;
            match scheme {
                SchemeKind::StepAuth if content.len() == consts::TAG_ID_SIZE => {
                    writeln!(&mut stdout, "{:10} {}", "tag id".bold(), hex::encode(content))
                        .map_err(Error::Stdout)?;
                    writeln!(&mut stdout, "{}", "path complete".bold()).map_err(Error::Stdout)?;
                }
                SchemeKind::StepAuth => dump_record(
                    &TagRecord::decode(content, SignatureScheme::EcdsaP256)?,
                    &mut stdout,
                )?,
                SchemeKind::Baseline => dump_record(
                    &TagRecord::decode(content, SignatureScheme::HmacSha256)?,
                    &mut stdout,
                )?,
                SchemeKind::Tracker => {
                    let record = TrackerRecord::decode(content)?;
                    for (name, ciphertext) in [
                        ("id", &record.id),
                        ("hash", &record.hash),
                        ("poly", &record.poly),
                    ] {
                        let bytes = ciphertext.to_bytes();
                        let (c1, c2) = bytes.split_at(bytes.len() / 2);
                        writeln!(&mut stdout, "{:10} {}", name.bold(), hex::encode(c1))
                            .map_err(Error::Stdout)?;
                        writeln!(&mut stdout, "{} {}", " ".repeat(10), hex::encode(c2))
                            .map_err(Error::Stdout)?;
                    }
                }
            }
        }
        args::Args::Telemetry { input } => {
            let mut frames = std::fs::read(input).map_err(Error::ReadTelemetryFile)?;
            for frame in frames.split_inclusive_mut(|b| *b == 0) {
                if *frame == [0] {
                    continue;
                }
                let report: CycleReport =
                    postcard::from_bytes_cobs(frame).map_err(Error::Telemetry)?;
                writeln!(&mut stdout, "{report}").map_err(Error::Stdout)?;
            }
        }
    }
    Ok(())
}

/// Generate keys for `provision.scheme` and write the authority and reader
/// config files. Returns the written paths.
fn provision_files(provision: &args::Provision) -> Result<Vec<PathBuf>, Error> {
    let out = &provision.out;
    std::fs::create_dir_all(out).map_err(Error::CreateDir)?;
    let mut rng = rng(provision.seed);
    let mut written = Vec::new();

    let mut mqtt = config::MqttConfig::default();
    if let Some(broker) = &provision.broker {
        mqtt.broker = broker.clone();
    }
    let reader_config = |id: u32| ReaderConfig {
        id,
        label: format!("reader-{id}"),
        scheme: provision.scheme,
        shared_key: None,
        issuer_public_key: None,
        tracker_public_key: None,
        x0: None,
        coefficient: None,
        delta: None,
        mqtt: mqtt.clone(),
        wifi: provision.wifi.clone(),
    };
    let mut authority = AuthorityConfig {
        scheme: provision.scheme,
        issuer_key: None,
        shared_key: None,
        valid_paths: Vec::new(),
        tracker: None,
        readers: Vec::new(),
    };
    let mut readers = Vec::new();

    match provision.scheme {
        SchemeKind::StepAuth => {
            let signing_key = SigningKey::random(&mut rng);
            let key_path = out.join(ISSUER_KEY_FILE);
            write_file(&key_path, args::signing_key_pem(&signing_key)?.as_bytes())
                .map_err(Error::WriteKeyFile)?;
            written.push(key_path);
            authority.issuer_key = Some(PathBuf::from(ISSUER_KEY_FILE));

            let public_key = hex::encode(
                signing_key
                    .verifying_key()
                    .as_affine()
                    .to_encoded_point(true),
            );
            for &id in &provision.readers {
                let shared_key = hex::encode(generate_shared_key(&mut rng).as_bytes());
                authority.readers.push(ReaderEntry {
                    id,
                    shared_key: Some(shared_key.clone()),
                    coefficient: None,
                });
                readers.push(ReaderConfig {
                    shared_key: Some(shared_key),
                    issuer_public_key: Some(public_key.clone()),
                    ..reader_config(id)
                });
            }
        }
        SchemeKind::Baseline => {
            let shared_key = hex::encode(generate_shared_key(&mut rng).as_bytes());
            authority.shared_key = Some(shared_key.clone());
            for &id in &provision.readers {
                readers.push(ReaderConfig {
                    shared_key: Some(shared_key.clone()),
                    ..reader_config(id)
                });
            }
        }
        SchemeKind::Tracker => {
            let mut tracker = TrackerAuthority::generate(&mut rng);
            let public_key = hex::encode(encode_point(&tracker.engine().public_key().to_affine()));
            let x0 = hex::encode(scalar_to_bytes(&tracker.x0()));
            for &id in &provision.readers {
                let coefficient = random_scalar(&mut rng);
                tracker.set_coefficient(id, coefficient);
                let coefficient = hex::encode(scalar_to_bytes(&coefficient));
                authority.readers.push(ReaderEntry {
                    id,
                    shared_key: None,
                    coefficient: Some(coefficient.clone()),
                });
                let update = match provision.counter_delta {
                    Some(delta) => ReaderConfig {
                        delta: Some(hex::encode(scalar_to_bytes(&Scalar::from(delta)))),
                        ..reader_config(id)
                    },
                    None => ReaderConfig {
                        x0: Some(x0.clone()),
                        coefficient: Some(coefficient),
                        ..reader_config(id)
                    },
                };
                readers.push(ReaderConfig {
                    tracker_public_key: Some(public_key.clone()),
                    ..update
                });
            }
            for path in &provision.valid_paths {
                tracker.add_valid_path(path)?;
            }
            authority.valid_paths = provision.valid_paths.clone();
            authority.tracker = Some(TrackerSecrets {
                secret: hex::encode(tracker.secret_bytes()),
                hash_key: hex::encode(tracker.hash_key().as_bytes()),
                x0,
                a0: hex::encode(scalar_to_bytes(&tracker.a0())),
            });
        }
    }

    let authority_path = out.join(AUTHORITY_FILE);
    config::save(&authority_path, &authority).map_err(Error::WriteConfig)?;
    written.push(authority_path);
    for reader in &readers {
        let path = out.join(format!("reader_{}.toml", reader.id));
        config::save(&path, reader).map_err(Error::WriteConfig)?;
        written.push(path);
    }
    log::info!(
        "provisioned {} readers for {}",
        provision.readers.len(),
        provision.scheme
    );
    Ok(written)
}

fn verify_tracker(
    authority: &TrackerAuthority,
    record: &TrackerRecord,
    counter_bound: Option<u64>,
    max_tag_id: Option<u32>,
    mut stdout: impl Write,
) -> Result<(), Error> {
    if let Some(bound) = max_tag_id {
        let written = match authority.find_tag_id(record, bound) {
            Some(tag_id) => writeln!(&mut stdout, "{:10} {tag_id}", "tag id".bold()),
            None => writeln!(&mut stdout, "{:10} above {bound}", "tag id".bold()),
        };
        written.map_err(Error::Stdout)?;
    }
    // Counter tags carry a count instead of a path polynomial.
    if let Some(bound) = counter_bound {
        let counter = authority
            .decrypt_counter(record, bound)
            .ok_or(Error::CounterAboveBound(bound))?;
        writeln!(&mut stdout, "{:10} {counter}", "counter".bold()).map_err(Error::Stdout)?;
        return Ok(());
    }
    match authority.verify(record) {
        TrackerVerdict::ValidPath(path) => writeln!(
            &mut stdout,
            "{:10} {}",
            "valid path".bold().green(),
            format_path(&path),
        )
        .map_err(Error::Stdout),
        TrackerVerdict::UnknownPath => Err(Error::UnknownTrackerPath),
        TrackerVerdict::Forged => Err(Error::ForgedTag),
    }
}

fn dump_record(record: &TagRecord, mut stdout: impl Write) -> Result<(), Error> {
    writeln!(
        &mut stdout,
        "{:10} {:08x}",
        "reader".bold(),
        record.reader_id()
    )
    .map_err(Error::Stdout)?;
    writeln!(
        &mut stdout,
        "{:10} {:08x}",
        "next".bold(),
        record.next_reader_id()
    )
    .map_err(Error::Stdout)?;
    let signature = record.signature();
    let (half_1, half_2) = signature.split_at(signature.len() / 2);
    writeln!(&mut stdout, "{:10} {}", "signature".bold(), hex::encode(half_1))
        .map_err(Error::Stdout)?;
    writeln!(&mut stdout, "{} {}", " ".repeat(10), hex::encode(half_2)).map_err(Error::Stdout)?;
    let (nonce, ciphertext) = record.payload().split_at(consts::NONCE_SIZE);
    writeln!(&mut stdout, "{:10} {}", "nonce".bold(), hex::encode(nonce)).map_err(Error::Stdout)?;
    writeln!(
        &mut stdout,
        "{:10} {}",
        "ciphertext".bold(),
        humansize::format_size(ciphertext.len(), humansize::BINARY),
    )
    .map_err(Error::Stdout)
}

fn format_path(path: &[u32]) -> String {
    if path.is_empty() {
        return "none".to_owned();
    }
    path.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn rng(seed: Option<u64>) -> StdRng {
    seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64)
}

/// Drain the telemetry queue, appending the frames to `path`.
fn append_telemetry(queue: &TelemetryQueue, path: &Path) -> Result<(), Error> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(Error::WriteTelemetryFile)?;
    while let Some(frame) = queue.receive() {
        file.write_all(frame).map_err(Error::WriteTelemetryFile)?;
        queue.receive_done();
    }
    Ok(())
}

/// Replace `path` with `contents` through a temporary file in the same
/// directory, so a failed write never leaves a half written file behind.
fn write_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(contents)?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

const ISSUER_KEY_FILE: &str = "issuer.pem";
const AUTHORITY_FILE: &str = "authority.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ExitCode(u8);

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        code.0.into()
    }
}

#[derive(Debug)]
enum Error {
    Args(args::Error),
    CounterAboveBound(u64),
    CreateDir(std::io::Error),
    ForgedTag,
    OptionForOtherScheme(&'static str, SchemeKind),
    PathMissing,
    Protocol(tag_protocol::Error),
    ReadTagFile(std::io::Error),
    ReadTelemetryFile(std::io::Error),
    Stdout(std::io::Error),
    Telemetry(postcard::Error),
    UnknownTrackerPath,
    WriteConfig(args::ConfigError),
    WriteKeyFile(std::io::Error),
    WriteTagFile(std::io::Error),
    WriteTelemetryFile(std::io::Error),
}

impl From<args::Error> for Error {
    fn from(e: args::Error) -> Self {
        Error::Args(e)
    }
}

impl From<tag_protocol::Error> for Error {
    fn from(e: tag_protocol::Error) -> Self {
        Error::Protocol(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Args(e) => write!(f, "{e}"),
            Error::CounterAboveBound(bound) => {
                write!(f, "counter is above {bound}, raise --counter-bound")
            }
            Error::CreateDir(e) => write!(f, "failed to create output directory: {e}"),
            Error::ForgedTag => write!(f, "tag id hash does not match: tag was not issued here"),
            Error::OptionForOtherScheme(option, scheme) => {
                write!(f, "{option} does not apply to {scheme}")
            }
            Error::PathMissing => write!(f, "--path must be specified for stepauth"),
            Error::Protocol(e) => write!(f, "{e}"),
            Error::ReadTagFile(e) => write!(f, "failed to read tag file: {e}"),
            Error::ReadTelemetryFile(e) => write!(f, "failed to read telemetry file: {e}"),
            Error::Stdout(e) => write!(f, "failed to write to stdout: {e}"),
            Error::Telemetry(e) => write!(f, "invalid telemetry frame: {e}"),
            Error::UnknownTrackerPath => write!(f, "tag went through an unknown path"),
            Error::WriteConfig(e) => write!(f, "{e}"),
            Error::WriteKeyFile(e) => write!(f, "failed to write key file: {e}"),
            Error::WriteTagFile(e) => write!(f, "failed to write tag file: {e}"),
            Error::WriteTelemetryFile(e) => write!(f, "failed to write telemetry file: {e}"),
        }
    }
}

impl std::error::Error for Error {}
