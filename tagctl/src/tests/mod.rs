use {
    self::input::{Network, TAG_ID},
    crate::{
        args::{
            self,
            config::{self, AuthorityConfig, ReaderConfig, WifiConfig},
        },
        ExitCode,
    },
    std::io::Write,
    tag_protocol::SchemeKind,
};


/// Provisioning writes the issuer key, the authority config and one config
/// per reader.
#[test]
fn provision_stepauth() {
    let network = Network::empty();
    let output = test([
        "provision",
        "--scheme",
        "stepauth",
        "--reader",
        "1,2",
        "-o",
        network.dir_str(),
        "--broker",
        "broker.local",
    ]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("issuer.pem"));
    assert!(output.stdout.contains("authority.toml"));
    assert!(output.stdout.contains("reader_1.toml"));
    assert!(output.stdout.contains("reader_2.toml"));
    assert!(output.stderr.is_empty());

    let authority: AuthorityConfig = config::load(&network.path("authority.toml")).unwrap();
    assert_eq!(authority.scheme, SchemeKind::StepAuth);
    assert_eq!(authority.issuer_key.unwrap().to_str(), Some("issuer.pem"));
    assert_eq!(authority.readers.len(), 2);

    let reader: ReaderConfig = config::load(&network.path("reader_2.toml")).unwrap();
    assert_eq!(reader.id, 2);
    assert_eq!(reader.scheme, SchemeKind::StepAuth);
    assert_eq!(reader.mqtt.broker, "broker.local");
    assert_eq!(reader.mqtt.port, consts::MQTT_PORT);
    assert!(reader.issuer_public_key.is_some());
    assert_eq!(
        reader.shared_key,
        authority.readers[1].shared_key,
        "reader and issuer share the key"
    );
    assert!(reader.x0.is_none());
}

/// Readers of the same Baseline network share one key.
#[test]
fn provision_baseline() {
    let network = Network::baseline("5,6");
    let authority: AuthorityConfig = config::load(&network.path("authority.toml")).unwrap();
    let reader_5: ReaderConfig = config::load(&network.path("reader_5.toml")).unwrap();
    let reader_6: ReaderConfig = config::load(&network.path("reader_6.toml")).unwrap();
    assert!(authority.shared_key.is_some());
    assert_eq!(reader_5.shared_key, authority.shared_key);
    assert_eq!(reader_6.shared_key, authority.shared_key);
    assert!(!network.path("issuer.pem").exists());
}

/// WiFi credentials land in every reader config and load with the reader.
#[test]
fn provision_wifi() {
    let network = Network::empty();
    let output = test([
        "provision",
        "--scheme",
        "baseline",
        "--reader",
        "1,2",
        "-o",
        network.dir_str(),
        "--wifi-ssid",
        "lab",
        "--wifi-password",
        "secret",
    ]);
    assert_eq!(output.exit_code, ExitCode(0));

    let expected = WifiConfig {
        ssid: "lab".to_owned(),
        password: "secret".to_owned(),
    };
    for name in ["reader_1.toml", "reader_2.toml"] {
        let reader: ReaderConfig = config::load(&network.path(name)).unwrap();
        assert_eq!(reader.wifi.as_ref(), Some(&expected));
    }

    let (reader, tag) = (network.reader(1), network.tag());
    match args::args(["tagctl", "scan", "-c", reader.as_str(), "-t", tag.as_str()]) {
        Ok(args::Args::Scan { reader, .. }) => assert_eq!(reader.wifi, Some(expected)),
        _ => panic!("scan arguments did not load"),
    }

    // Readers provisioned without WiFi carry none.
    let plain = Network::baseline("1");
    let reader: ReaderConfig = config::load(&plain.path("reader_1.toml")).unwrap();
    assert!(reader.wifi.is_none());
}

#[test]
fn provision_wifi_without_password() {
    let network = Network::empty();
    let output = test([
        "provision",
        "--scheme",
        "baseline",
        "--reader",
        "1",
        "-o",
        network.dir_str(),
        "--wifi-ssid",
        "lab",
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("--wifi-password"));
    assert!(!network.path("reader_1.toml").exists());
}

/// The same seed provisions the same keys.
#[test]
fn provision_is_reproducible_with_seed() {
    let first = Network::tracker("1,2", "1,2");
    let second = Network::tracker("1,2", "1,2");
    let first = std::fs::read_to_string(first.path("authority.toml")).unwrap();
    let second = std::fs::read_to_string(second.path("authority.toml")).unwrap();
    assert_eq!(first, second);
}

#[test]
fn provision_invalid_scheme() {
    let network = Network::empty();
    let output = test([
        "provision",
        "--scheme",
        "onion",
        "--reader",
        "1",
        "-o",
        network.dir_str(),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stdout.is_empty());
    assert!(output.stderr.contains(r#"invalid scheme: "onion""#));
}

#[test]
fn provision_valid_path_with_unknown_reader() {
    let network = Network::empty();
    let output = test([
        "provision",
        "--scheme",
        "tracker",
        "--reader",
        "1,2",
        "--valid-path",
        "1,9",
        "-o",
        network.dir_str(),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("not provisioned"));
    assert!(!network.path("authority.toml").exists());
}

#[test]
fn provision_tracker_option_for_baseline() {
    let network = Network::empty();
    let output = test([
        "provision",
        "--scheme",
        "baseline",
        "--reader",
        "1",
        "--counter-delta",
        "1",
        "-o",
        network.dir_str(),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("only apply to tracker"));
}

/// A StepAuth tag walks its whole path, one layer per reader.
#[test]
fn stepauth_full_path() {
    let network = Network::stepauth("1,2,3");
    let output = issue_stepauth(&network, "1,2,3");
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("issued"));
    assert!(output.stdout.contains("stepauth"));
    assert_eq!(network.tag_image().len(), consts::TAG_CAPACITY);

    let output = network.verify();
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains(TAG_ID));
    assert!(output.stdout.contains("1 -> 2 -> 3"));

    let output = network.scan(1);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("#1 reader 1 stepauth: update written"));
    assert!(!output.stdout.contains("path complete"));

    let output = network.verify();
    assert!(output.stdout.contains("2 -> 3"));
    assert!(!output.stdout.contains("1 -> 2"));

    assert_eq!(network.scan(2).exit_code, ExitCode(0));
    let output = network.scan(3);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("update written"));
    assert!(output.stdout.contains("path complete"));

    let output = network.verify();
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("path complete"));
    assert!(output.stdout.contains(TAG_ID));
}

/// A reader that is not the next hop leaves the tag untouched.
#[test]
fn stepauth_wrong_reader() {
    let network = Network::stepauth("1,2");
    issue_stepauth(&network, "1,2");
    let before = network.tag_image();

    let output = network.scan(2);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("reader 2 stepauth: identity mismatch"));
    assert_eq!(network.tag_image(), before);

    let output = network.scan(1);
    assert!(output.stdout.contains("update written"));
    assert_ne!(network.tag_image(), before);
}

/// Any flipped content bit fails the signature check.
#[test]
fn stepauth_tampered_tag() {
    let network = Network::stepauth("1");
    issue_stepauth(&network, "1");
    let mut image = network.tag_image();
    image[40] ^= 0x01;
    std::fs::write(network.tag(), &image).unwrap();

    let output = network.scan(1);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("signature invalid"));
    assert_eq!(network.tag_image(), image);

    let output = network.verify();
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("signature"));
}

#[test]
fn stepauth_issue_without_path() {
    let network = Network::stepauth("1");
    let output = test([
        "issue",
        "-c",
        &network.authority(),
        "-t",
        &network.tag(),
        "--tag-id",
        TAG_ID,
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("--path must be specified"));
    assert!(!network.path("tag.bin").exists());
}

#[test]
fn stepauth_issue_unknown_reader() {
    let network = Network::stepauth("1,2");
    let output = issue_stepauth(&network, "1,4");
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(!network.path("tag.bin").exists());
}

/// Baseline tags log every reader that updated them.
#[test]
fn baseline_visit_log() {
    let network = Network::baseline("5,6");
    let output = test([
        "issue",
        "-c",
        &network.authority(),
        "-t",
        &network.tag(),
        "--tag-id",
        TAG_ID,
        "--seed",
        "3",
    ]);
    assert_eq!(output.exit_code, ExitCode(0));

    let output = network.verify();
    assert!(output.stdout.contains("none"));

    assert!(network.scan(6).stdout.contains("update written"));
    assert!(network.scan(5).stdout.contains("update written"));

    let output = network.verify();
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains(TAG_ID));
    assert!(output.stdout.contains("6 -> 5"));
}

/// The same reader never updates a Baseline tag twice in a row.
#[test]
fn baseline_repeated_reader() {
    let network = Network::baseline("5,6");
    issue_baseline(&network, None);
    assert!(network.scan(5).stdout.contains("update written"));
    let before = network.tag_image();
    let output = network.scan(5);
    assert!(output.stdout.contains("identity mismatch"));
    assert_eq!(network.tag_image(), before);
}

#[test]
fn baseline_first_reader() {
    let network = Network::baseline("5,6");
    issue_baseline(&network, Some("5"));
    assert!(network.scan(6).stdout.contains("identity mismatch"));
    assert!(network.scan(5).stdout.contains("update written"));
    assert!(network.verify().stdout.contains("visited"));
}

#[test]
fn baseline_issue_with_path() {
    let network = Network::baseline("5");
    let output = issue_stepauth(&network, "5");
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("--path does not apply to baseline"));
}

/// The manager recognizes the registered path.
#[test]
fn tracker_valid_path() {
    let network = Network::tracker("1,2", "1,2");
    issue_tracker(&network, None);
    assert!(network.scan(1).stdout.contains("reader 1 tracker: update written"));
    assert!(network.scan(2).stdout.contains("update written"));

    let output = test([
        "verify",
        "-c",
        &network.authority(),
        "-t",
        &network.tag(),
        "--max-tag-id",
        "100",
    ]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("valid path"));
    assert!(output.stdout.contains("1 -> 2"));
    assert!(output.stdout.contains(TAG_ID));
}

#[test]
fn tracker_unknown_path() {
    let network = Network::tracker("1,2", "1,2");
    issue_tracker(&network, None);
    network.scan(2);
    network.scan(1);

    let output = network.verify();
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("unknown path"));
}

/// Re-randomized ciphertexts change on every update, even for the same
/// reader.
#[test]
fn tracker_rerandomizes() {
    let network = Network::tracker("1", "1");
    issue_tracker(&network, None);
    let issued = network.tag_image();
    network.scan(1);
    let first = network.tag_image();
    assert_ne!(issued, first);
    assert!(network.verify().stdout.contains("valid path"));
}

/// Counter tag starting at 10, updated twice with a delta of 1.
#[test]
fn tracker_counter() {
    let network = Network::counter("1,2", "1");
    issue_tracker(&network, Some("10"));
    assert!(network.scan(1).stdout.contains("update written"));
    assert!(network.scan(2).stdout.contains("update written"));

    let output = test([
        "verify",
        "-c",
        &network.authority(),
        "-t",
        &network.tag(),
        "--counter-bound",
        "100",
    ]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("12"));

    let output = test([
        "verify",
        "-c",
        &network.authority(),
        "-t",
        &network.tag(),
        "--counter-bound",
        "11",
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("counter is above 11"));
}

/// Telemetry frames from several scans decode back into reports.
#[test]
fn telemetry_frames() {
    let network = Network::stepauth("1,2");
    issue_stepauth(&network, "1,2");
    for reader in [2, 1] {
        let output = test([
            "scan",
            "-c",
            &network.reader(reader),
            "-t",
            &network.tag(),
            "--telemetry",
            &network.telemetry(),
        ]);
        assert_eq!(output.exit_code, ExitCode(0));
    }

    let output = test(["telemetry", "-i", &network.telemetry()]);
    assert_eq!(output.exit_code, ExitCode(0));
    let lines: Vec<_> = output.stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("reader 2 stepauth: identity mismatch"));
    assert!(lines[1].contains("reader 1 stepauth: update written"));
    assert!(lines.iter().all(|line| line.contains(" rssi -48")));
}

#[test]
fn telemetry_garbage() {
    let file = create_file(&[0x05, 0xff, 0xff, 0xff, 0xff, 0x00]);
    let output = test(["telemetry", "-i", file.path().to_str().unwrap()]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("invalid telemetry frame"));
}

/// The screen shows the scheme banner above the report.
#[test]
fn scan_screen() {
    let network = Network::tracker("1", "1");
    issue_tracker(&network, None);
    let output = test([
        "scan",
        "-c",
        &network.reader(1),
        "-t",
        &network.tag(),
        "--screen",
    ]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("Tracker Update"));
}

#[test]
fn scan_missing_config() {
    let network = Network::empty();
    let output = test([
        "scan",
        "-c",
        &network.reader(1),
        "-t",
        &network.tag(),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stdout.is_empty());
    assert!(output.stderr.contains("failed to access config file"));
}

#[test]
fn scan_empty_tag() {
    let network = Network::baseline("5");
    std::fs::write(network.tag(), [0; consts::TAG_CAPACITY]).unwrap();
    let output = network.scan(5);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("malformed record"));
}

/// Dump the header fields of a StepAuth record.
#[test]
fn dump_stepauth() {
    let network = Network::stepauth("1,2");
    issue_stepauth(&network, "1,2");
    let output = test(["dump", "-t", &network.tag(), "--scheme", "stepauth"]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("reader"));
    assert!(output.stdout.contains("00000001"));
    assert!(output.stdout.contains("00000002"));
    assert!(output.stdout.contains("signature"));
    assert!(output.stdout.contains("nonce"));
    assert!(output.stderr.is_empty());
}

/// A consumed StepAuth tag only holds its id.
#[test]
fn dump_stepauth_complete() {
    let network = Network::stepauth("1");
    issue_stepauth(&network, "1");
    network.scan(1);
    let output = test(["dump", "-t", &network.tag(), "--scheme", "stepauth"]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("4 B (4)"));
    assert!(output.stdout.contains("0000004d"));
    assert!(output.stdout.contains("path complete"));
}

#[test]
fn dump_tracker() {
    let network = Network::tracker("1", "1");
    issue_tracker(&network, None);
    let output = test(["dump", "-t", &network.tag(), "--scheme", "tracker"]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("198 B (198)"));
    assert!(output.stdout.contains("hash"));
    assert!(output.stdout.contains("poly"));
}

/// The issuer key must be a SEC1 private key.
#[test]
fn invalid_pem_tag() {
    let network = Network::stepauth("1");
    std::fs::write(network.path("issuer.pem"), input::PUBLIC_KEY_PEM).unwrap();
    let output = issue_stepauth(&network, "1");
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output
        .stderr
        .contains(r#"invalid PEM tag: "PUBLIC KEY", expected "EC PRIVATE KEY""#));
}

#[test]
fn missing_subcommand() {
    let output = test([]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("Usage"));
}

fn issue_stepauth(network: &Network, path: &str) -> Output {
    test([
        "issue",
        "-c",
        &network.authority(),
        "-t",
        &network.tag(),
        "--tag-id",
        TAG_ID,
        "--path",
        path,
        "--seed",
        "3",
    ])
}

fn issue_baseline(network: &Network, first_reader: Option<&str>) {
    let output = match first_reader {
        Some(reader) => test([
            "issue",
            "-c",
            &network.authority(),
            "-t",
            &network.tag(),
            "--tag-id",
            TAG_ID,
            "--first-reader",
            reader,
        ]),
        None => test([
            "issue",
            "-c",
            &network.authority(),
            "-t",
            &network.tag(),
            "--tag-id",
            TAG_ID,
        ]),
    };
    assert_eq!(output.exit_code, ExitCode(0));
}

fn issue_tracker(network: &Network, counter: Option<&str>) {
    let output = match counter {
        Some(counter) => test([
            "issue",
            "-c",
            &network.authority(),
            "-t",
            &network.tag(),
            "--tag-id",
            TAG_ID,
            "--counter",
            counter,
        ]),
        None => test([
            "issue",
            "-c",
            &network.authority(),
            "-t",
            &network.tag(),
            "--tag-id",
            TAG_ID,
        ]),
    };
    assert_eq!(output.exit_code, ExitCode(0));
}

fn test<const N: usize>(args: [&str; N]) -> Output {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let exit_code = crate::main_args(
        std::iter::once("tagctl").chain(args),
        &mut stdout,
        &mut stderr,
    );
    println!("* args: {:?}", args);
    println!("* exit_code: {:?}", exit_code);
    println!("* stdout:\n{}", String::from_utf8_lossy(&stdout));
    println!("* stderr:\n{}", String::from_utf8_lossy(&stderr));
    Output {
        exit_code,
        stdout: String::from_utf8(stdout).unwrap(),
        stderr: String::from_utf8(stderr).unwrap(),
    }
}

#[derive(Debug)]
struct Output {
    exit_code: ExitCode,
    stdout: String,
    stderr: String,
}

fn create_file(data: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(data).unwrap();
    file
}
