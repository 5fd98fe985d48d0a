use crate::core::config::JobConfig;

#[derive(Debug, Clone)]
pub struct YtDlpCommand {
    pub url: String,
    pub format: String,
    pub fixup: String,
    pub force_ipv4: bool,
    pub extra_args: Vec<String>,
}

impl YtDlpCommand {
    pub fn new(url: &str, config: &JobConfig) -> Self {
        Self {
            url: url.to_string(),
            format: config.format.clone(),
            fixup: config.fixup.clone(),
            force_ipv4: config.force_ipv4,
            extra_args: config.extra_args.clone(),
        }
    }

    /// The URL is always the final argument.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        args.push("-f".to_string());
        args.push(self.format.clone());

        args.push("--fixup".to_string());
        args.push(self.fixup.clone());

        if self.force_ipv4 {
            args.push("-4".to_string());
        }

        args.extend(self.extra_args.iter().cloned());
        args.push(self.url.clone());

        args
    }
}
