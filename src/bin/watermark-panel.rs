use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pixelbin_watermark_panel::{
    ChannelSink, FormValues, RetryPolicy, Session, DEFAULT_SERVICE_DOMAIN,
};

#[derive(Parser)]
#[command(
    name = "watermark-panel",
    about = "Remove an image watermark via the PixelBin API",
    version,
    after_help = "The API token is read from --token or the PIXELBIN_API_TOKEN\n\
                  environment variable. Credits are checked before processing."
)]
struct Cli {
    /// Input image file
    input: PathBuf,

    /// API token (falls back to PIXELBIN_API_TOKEN)
    #[arg(short, long)]
    token: Option<String>,

    /// Service API domain
    #[arg(long, default_value = DEFAULT_SERVICE_DOMAIN)]
    domain: String,

    /// Cloud name addressing the organization's CDN space
    #[arg(short, long)]
    cloud_name: String,

    /// Transformation parameter as name=value (repeatable)
    #[arg(short, long = "param", value_name = "NAME=VALUE")]
    params: Vec<String>,

    /// Maximum upload attempts before giving up
    #[arg(long, default_value = "8")]
    max_attempts: u32,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let Cli {
        input,
        token,
        domain,
        cloud_name,
        params,
        max_attempts,
    } = Cli::parse();

    let Some(token) = token.or_else(|| std::env::var("PIXELBIN_API_TOKEN").ok()) else {
        eprintln!("Error: No API token; pass --token or set PIXELBIN_API_TOKEN");
        process::exit(1);
    };

    let form_values = match parse_params(&params) {
        Ok(p) => p,
        Err(bad) => {
            eprintln!("Error: Malformed parameter {bad:?}, expected NAME=VALUE");
            process::exit(1);
        }
    };

    let bytes = match std::fs::read(&input) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Error: Failed to read {}: {e}", input.display());
            process::exit(1);
        }
    };
    let image_name = input
        .file_stem()
        .map_or_else(|| "image".to_string(), |s| s.to_string_lossy().to_string());

    let (sink, _outbound) = ChannelSink::channel();
    let mut session = Session::with_domain(sink, domain.clone());
    session.set_retry_policy(RetryPolicy {
        max_attempts,
        ..RetryPolicy::default()
    });
    session.apply_saved_form_values(&form_values);

    if let Err(e) = session.save_token(&token, &domain).await {
        eprintln!("Error: Token validation failed: {e}");
        process::exit(1);
    }

    eprintln!("Credits: {}", session.usage().display());
    if !session.submit_enabled() {
        eprintln!("Error: Out of credits");
        process::exit(1);
    }

    match session
        .process_image(bytes.into(), &image_name, &cloud_name)
        .await
    {
        Ok(url) => println!("{url}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn parse_params(raw: &[String]) -> Result<FormValues, String> {
    let mut values = FormValues::new();
    for entry in raw {
        let Some((name, value)) = entry.split_once('=') else {
            return Err(entry.clone());
        };
        // Accept JSON scalars (true, 0.6) and fall back to plain strings.
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        values.insert(name.to_string(), value);
    }
    Ok(values)
}
