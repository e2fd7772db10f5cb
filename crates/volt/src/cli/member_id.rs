use anyhow::Result;
use clap::Parser;

use volt_core::cluster::MemberId;

/// Print the member ID for this host.
#[derive(Parser)]
pub struct MemberIdCommand {
    /// Listen address the member would run with.
    #[arg(short, long)]
    pub listen: String,

    /// Hostname to use instead of the local one.
    #[arg(long)]
    pub hostname: Option<String>,
}

impl MemberIdCommand {
    pub fn execute(self) -> Result<()> {
        let hostname = self.hostname.unwrap_or_else(crate::runtime::local_hostname);
        println!("{}", MemberId::derive(&hostname, &self.listen));
        Ok(())
    }
}
