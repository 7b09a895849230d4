use std::{path::Path, sync::Arc};

use axum_test::TestServer;
use deckshare_config::Config;
use deckshare_server::{AppContext, AppState, create_app};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

// Code is used by test modules, but not in this scope
#[allow(unused)]
pub struct TestApp {
    pub server: TestServer,
    pub context: Arc<AppContext>,
    pub share: TempDir,
}

#[allow(unused)]
impl TestApp {
    pub fn root(&self) -> &Path {
        self.context.config().root()
    }

    pub fn write(&self, relative: &str, contents: impl AsRef<[u8]>) {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    pub fn write_png(&self, relative: &str, width: u32, height: u32) {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        img.save(self.root().join(relative)).unwrap();
    }
}

#[allow(unused)]
#[derive(Debug, Clone)]
pub struct TestAppBuilder {
    uploads: bool,
    thumbnails: bool,
    max_chunk: Option<usize>,
}

#[allow(unused)]
impl TestAppBuilder {
    pub fn new() -> Self {
        Self {
            uploads: true,
            thumbnails: true,
            max_chunk: None,
        }
    }

    pub fn uploads(mut self, enabled: bool) -> Self {
        self.uploads = enabled;
        self
    }

    pub fn thumbnails(mut self, enabled: bool) -> Self {
        self.thumbnails = enabled;
        self
    }

    pub fn max_chunk(mut self, bytes: usize) -> Self {
        self.max_chunk = Some(bytes);
        self
    }

    pub fn build(self) -> TestApp {
        let share = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(share.path()).unwrap();

        let mut config = Config::with_root(root);
        config.server.idle_timeout = None;
        config.uploads.enabled = self.uploads;
        config.thumbnails.enabled = self.thumbnails;
        config.thumbnails.workers = 2;
        if let Some(max_chunk) = self.max_chunk {
            config.uploads.max_chunk = max_chunk;
        }

        let context = Arc::new(AppContext::new(Arc::new(config)));
        let server =
            TestServer::new(create_app(AppState::new(Arc::clone(&context))))
                .unwrap();

        TestApp {
            server,
            context,
            share,
        }
    }
}

#[allow(unused)]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
