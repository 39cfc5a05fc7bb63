//! Docker build context assembly.
//!
//! The context is an in-memory tar archive holding exactly the generated
//! files of [`Template::ALL`], owned by the configured uid/gid. It is built
//! fresh for every image build and handed to the daemon once.

use tracing::debug;

use crate::config::DbbConfig;
use crate::error::ConfigResult;
use crate::template::Template;

const FILE_MODE: u32 = 0o644;

/// Builds Docker build contexts from the configuration's templates.
#[derive(Debug, Clone)]
pub struct DockerContext {
    config: DbbConfig,
}

impl DockerContext {
    /// Create a context builder for the given configuration.
    #[must_use]
    pub fn new(config: DbbConfig) -> Self {
        Self { config }
    }

    /// Render one generated file.
    pub fn render(&self, template: Template) -> ConfigResult<String> {
        template.render(&self.config)
    }

    /// Build the tar archive.
    pub fn archive(&self) -> ConfigResult<Vec<u8>> {
        let uid = u64::from(self.config.uid());
        let gid = u64::from(self.config.gid());

        let mut tar_data = Vec::new();
        {
            let mut tar_builder = tar::Builder::new(&mut tar_data);

            for template in Template::ALL {
                let contents = self.render(template)?;

                let mut header = tar::Header::new_gnu();
                header.set_size(u64::try_from(contents.len()).unwrap_or(u64::MAX));
                header.set_mode(FILE_MODE);
                header.set_uid(uid);
                header.set_gid(gid);
                header.set_entry_type(tar::EntryType::Regular);

                tar_builder.append_data(&mut header, template.filename(), contents.as_bytes())?;
            }

            tar_builder.finish()?;
        }

        debug!(size = tar_data.len(), "created build context archive");
        Ok(tar_data)
    }
}
