use std::error::Error;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use healthcard_pace::iso7816::apdu::{Command, CommandHeader};
use healthcard_pace::iso7816::simulator::{self, SimulatorConfig};
use healthcard_pace::pace::{self, Can, MrzKey, PaceParameters, Password};
use tracing::info;


#[derive(Clone, Debug, Parser)]
#[command(version, about = "Establishes PACE with a health card and encodes APDUs")]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Clone, Debug, Subcommand)]
enum Mode {
    /// Runs PACE against a card behind a simulator connection.
    Establish(EstablishOpts),

    /// Encodes a command APDU and prints it as a hex dump.
    EncodeApdu(EncodeApduOpts),
}

#[derive(Args, Clone, Debug)]
struct EstablishOpts {
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(short, long, default_value = "8000")]
    pub port: u16,

    /// Card access number printed on the card.
    #[arg(long, conflicts_with = "mrz", required_unless_present = "mrz")]
    pub can: Option<String>,

    /// MRZ key (document number, birth date and expiry date with check digits).
    #[arg(long)]
    pub mrz: Option<String>,

    /// Contents of EF.CardAccess as hex; brainpoolP256r1 with AES-128 is used otherwise.
    #[arg(long)]
    pub card_access: Option<String>,

    /// Read timeout in seconds.
    #[arg(long, default_value = "10")]
    pub read_timeout: u64,

    /// Write timeout in seconds.
    #[arg(long, default_value = "10")]
    pub write_timeout: u64,
}

#[derive(Args, Clone, Debug)]
struct EncodeApduOpts {
    #[arg(value_parser = parse_hex_byte)]
    pub cla: u8,

    #[arg(value_parser = parse_hex_byte)]
    pub ins: u8,

    #[arg(value_parser = parse_hex_byte)]
    pub p1: u8,

    #[arg(value_parser = parse_hex_byte)]
    pub p2: u8,

    /// Command data as hex.
    #[arg(short, long)]
    pub data: Option<String>,

    /// Expected response length; 0 means the maximum.
    #[arg(short = 'e', long)]
    pub ne: Option<usize>,
}


fn parse_hex_byte(s: &str) -> Result<u8, String> {
    let s = s.trim_start_matches("0x");
    u8::from_str_radix(s, 16)
        .map_err(|e| format!("invalid hex byte {:?}: {}", s, e))
}

fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, String> {
    let digits: String = s.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    hex::decode(&digits)
        .map_err(|e| format!("invalid hex string: {}", e))
}


fn establish(opts: EstablishOpts) -> Result<(), Box<dyn Error>> {
    let password = match (&opts.can, &opts.mrz) {
        (Some(can), _) => Password::Can(can.parse::<Can>()?),
        (None, Some(mrz)) => Password::Mrz(mrz.parse::<MrzKey>()?),
        (None, None) => return Err("either --can or --mrz is required".into()),
    };

    let parameters = match &opts.card_access {
        Some(card_access) => PaceParameters::from_card_access(&parse_hex_bytes(card_access)?)?,
        None => PaceParameters::default(),
    };

    let config = SimulatorConfig::new()
        .with_read_timeout(Duration::from_secs(opts.read_timeout))
        .with_write_timeout(Duration::from_secs(opts.write_timeout));
    let mut card = simulator::connect((opts.host.as_str(), opts.port), config)?;
    info!("connected to {}:{}", opts.host, opts.port);

    let session_keys = pace::establish_with_parameters(&mut card, parameters, &password)?;
    println!(
        "PACE established ({:?} on {}), {}-byte session keys",
        parameters.cipher_suite, parameters.domain.curve().name(), session_keys.enc().len(),
    );
    Ok(())
}


fn encode_apdu(opts: EncodeApduOpts) -> Result<(), Box<dyn Error>> {
    let header = CommandHeader::new(opts.cla, opts.ins, opts.p1, opts.p2);
    let data = opts.data.as_deref()
        .map(parse_hex_bytes)
        .transpose()?;
    let command = Command::new(header, data.as_deref(), opts.ne)?;
    println!("{:?}", command.apdu_case());
    print!("{}", healthcard_pace::hexdump(command.bytes()));
    Ok(())
}


fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.mode {
        Mode::Establish(opts) => establish(opts),
        Mode::EncodeApdu(opts) => encode_apdu(opts),
    }
}
