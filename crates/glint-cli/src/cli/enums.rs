use clap::ValueEnum;
use glint_config::LiveReload;

/// Browser reaction to changes
#[derive(Copy, Clone, PartialEq, Eq, Debug, ValueEnum)]
pub enum LiveReloadArg {
    /// Swap stylesheets in place, reload the page for everything else
    #[value(name = "hot-reload")]
    HotReload,

    /// Reload the whole page on every change
    #[value(name = "full-page")]
    FullPage,

    /// Don't inject the reload client
    #[value(name = "off")]
    Off,
}

impl From<LiveReloadArg> for LiveReload {
    fn from(arg: LiveReloadArg) -> Self {
        match arg {
            LiveReloadArg::HotReload => LiveReload::HotReload,
            LiveReloadArg::FullPage => LiveReload::FullPage,
            LiveReloadArg::Off => LiveReload::Off,
        }
    }
}
