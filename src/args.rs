use std::path::PathBuf;

use clap::Parser;

/// Receives signed Canva publish callbacks and relays their assets to Cloudinary.
#[derive(Parser, Debug)]
#[command(version)]
pub struct Cli {
    /// Port to listen on (overrides `SERVER_PORT`)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// `.env` file to load before reading configuration (defaults to `./.env` if present)
    #[arg(short, long)]
    pub env_file: Option<PathBuf>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["canva-thumbnail-relay"]).unwrap();
        assert!(cli.port.is_none());
        assert!(cli.env_file.is_none());
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::try_parse_from([
            "canva-thumbnail-relay",
            "--port",
            "8080",
            "-e",
            "/etc/relay.env",
        ])
        .unwrap();

        assert_eq!(cli.port, Some(8080));
        assert_eq!(cli.env_file, Some(PathBuf::from("/etc/relay.env")));
    }

    #[test]
    fn test_bad_port() {
        assert!(Cli::try_parse_from(["canva-thumbnail-relay", "-p", "http"]).is_err());
    }
}
