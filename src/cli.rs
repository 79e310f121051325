use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Serial device base path (overrides SHOWRUNNER_SERIAL_BASE)
    #[arg(long)]
    pub serial: Option<String>,

    /// WebSocket listen address (overrides SHOWRUNNER_WS_LISTEN)
    #[arg(long)]
    pub listen: Option<String>,

    /// Target frames per second (overrides SHOWRUNNER_FPS)
    #[arg(long)]
    pub fps: Option<u32>,

    /// Initial animation filename (overrides SHOWRUNNER_INITIAL_ANIMATION)
    #[arg(long)]
    pub animation: Option<String>,

    /// Validate configuration and inputs, then exit without rendering
    #[arg(long, default_value_t = false)]
    pub check: bool,
}

impl Args {
    /// Fold CLI overrides into the environment-derived configuration.
    pub fn apply(&self, cfg: &mut crate::config::Config) {
        if let Some(serial) = &self.serial {
            cfg.serial_base = serial.clone();
        }
        if let Some(listen) = &self.listen {
            cfg.ws_listen = listen.clone();
        }
        if let Some(fps) = self.fps {
            cfg.fps = fps;
        }
        if let Some(animation) = &self.animation {
            cfg.initial_animation = animation.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn help_includes_override_flags() {
        let mut cmd = Args::command();
        let mut help = Vec::new();
        cmd.write_long_help(&mut help).expect("write help");
        let help = String::from_utf8(help).expect("utf8 help");
        assert!(help.contains("--serial"));
        assert!(help.contains("--listen"));
        assert!(help.contains("--fps"));
    }

    #[test]
    fn overrides_replace_config_fields() {
        let args = Args {
            serial: Some("/dev/ttyUSB".into()),
            listen: Some("127.0.0.1:9090".into()),
            fps: Some(60),
            animation: None,
            check: false,
        };
        let mut cfg = crate::config::Config::default();
        args.apply(&mut cfg);
        assert_eq!(cfg.serial_base, "/dev/ttyUSB");
        assert_eq!(cfg.ws_listen, "127.0.0.1:9090");
        assert_eq!(cfg.fps, 60);
        assert_eq!(cfg.initial_animation, "default.rhai");
    }
}
