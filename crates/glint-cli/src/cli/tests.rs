#[cfg(test)]
mod tests {
    use crate::cli::validation::parse_store;
    use crate::cli::{Cli, Command, LiveReloadArg};
    use clap::Parser;
    use std::path::PathBuf;

    #[test]
    fn test_parse_store_accepts_domains_and_urls() {
        assert_eq!(
            parse_store("example.myshopify.com"),
            Ok("example.myshopify.com".to_string())
        );
        assert_eq!(
            parse_store("https://Example.myshopify.com/admin/themes"),
            Ok("example.myshopify.com".to_string())
        );
        assert_eq!(parse_store("example"), Ok("example.myshopify.com".to_string()));
    }

    #[test]
    fn test_parse_store_rejects_invalid() {
        assert!(parse_store("").is_err());
        assert!(parse_store("https://").is_err());
        assert!(parse_store("my shop").is_err());
        assert!(parse_store("shop@example.com").is_err());
    }

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::try_parse_from(["glint", "serve"]).unwrap();
        let Command::Serve(args) = cli.command;

        assert_eq!(args.root, PathBuf::from("."));
        assert!(args.store.is_none());
        assert!(args.port.is_none());
        assert!(!args.poll);
        assert!(!args.editor_sync);
        assert!(args.live_reload.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn test_serve_all_flags() {
        let cli = Cli::try_parse_from([
            "glint",
            "serve",
            "themes/dawn",
            "--store",
            "example",
            "--host",
            "0.0.0.0",
            "-p",
            "9393",
            "-t",
            "Dawn",
            "--poll",
            "--editor-sync",
            "--live-reload",
            "full-page",
            "-x",
            "assets/*.map",
            "-x",
            "notes/",
            "--https",
            "--cert",
            "cert.pem",
            "--key",
            "key.pem",
            "--open",
            "--verbose",
        ])
        .unwrap();
        let Command::Serve(args) = cli.command;

        assert_eq!(args.root, PathBuf::from("themes/dawn"));
        assert_eq!(args.store.as_deref(), Some("example.myshopify.com"));
        assert_eq!(args.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(args.port, Some(9393));
        assert_eq!(args.theme.as_deref(), Some("Dawn"));
        assert!(args.poll && args.editor_sync && args.https && args.open);
        assert_eq!(args.live_reload, Some(LiveReloadArg::FullPage));
        assert_eq!(args.ignore, vec!["assets/*.map", "notes/"]);
        assert_eq!(args.cert, Some(PathBuf::from("cert.pem")));
        assert!(cli.verbose);
    }

    #[test]
    fn test_cert_requires_https() {
        assert!(Cli::try_parse_from(["glint", "serve", "--cert", "cert.pem"]).is_err());
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["glint", "--quiet", "--verbose", "serve"]).is_err());
    }

    #[test]
    fn test_invalid_live_reload_mode() {
        assert!(Cli::try_parse_from(["glint", "serve", "--live-reload", "sometimes"]).is_err());
    }
}
