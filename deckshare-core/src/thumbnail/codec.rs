use std::path::Path;

use image::{DynamicImage, RgbImage, codecs::jpeg::JpegEncoder};
use tracing::debug;

use super::{Thumbnail, ThumbnailSettings};
use crate::{error::CodecError, media::MediaKind};

/// Produces a preview for one file. Implementations are called from the
/// blocking thread pool and may be slow; they must not assume they run on
/// an async runtime.
pub trait ThumbnailCodec: Send + Sync + 'static {
    fn generate(
        &self,
        path: &Path,
        kind: MediaKind,
    ) -> Result<Thumbnail, CodecError>;
}

/// Default codec: `image` for stills, FFmpeg for the first video frame.
#[derive(Debug, Clone, Default)]
pub struct MediaCodec {
    settings: ThumbnailSettings,
}

impl MediaCodec {
    pub fn new(settings: ThumbnailSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ThumbnailSettings {
        &self.settings
    }

    fn image_thumbnail(&self, path: &Path) -> Result<Thumbnail, CodecError> {
        let source = image::open(path)?;
        let box_size = self.settings.box_size;
        let resized = source.thumbnail(box_size, box_size);
        debug!(
            path = %path.display(),
            from = ?(source.width(), source.height()),
            to = ?(resized.width(), resized.height()),
            "image thumbnail resized"
        );
        encode_jpeg(&flatten(resized), self.settings.jpeg_quality)
    }

    #[cfg(feature = "ffmpeg")]
    fn video_thumbnail(&self, path: &Path) -> Result<Thumbnail, CodecError> {
        let frame = video::first_frame(path, self.settings.video_width)?;
        encode_jpeg(&frame, self.settings.jpeg_quality)
    }

    #[cfg(not(feature = "ffmpeg"))]
    fn video_thumbnail(&self, _path: &Path) -> Result<Thumbnail, CodecError> {
        Err(CodecError::Unavailable(
            "built without FFmpeg support".to_string(),
        ))
    }
}

impl ThumbnailCodec for MediaCodec {
    fn generate(
        &self,
        path: &Path,
        kind: MediaKind,
    ) -> Result<Thumbnail, CodecError> {
        match kind {
            MediaKind::Image => self.image_thumbnail(path),
            MediaKind::Video => self.video_thumbnail(path),
            MediaKind::Unsupported => Err(CodecError::NotApplicable {
                path: path.to_path_buf(),
                kind,
            }),
        }
    }
}

fn flatten(image: DynamicImage) -> RgbImage {
    match image {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => other.to_rgb8(),
    }
}

fn encode_jpeg(rgb: &RgbImage, quality: u8) -> Result<Thumbnail, CodecError> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
        .encode_image(rgb)?;
    Ok(Thumbnail::new(jpeg, rgb.width(), rgb.height()))
}

/// Height for a frame scaled to `target_width`, keeping the aspect ratio.
#[cfg_attr(not(feature = "ffmpeg"), allow(dead_code))]
fn proportional_height(width: u32, height: u32, target_width: u32) -> u32 {
    let scaled = (u64::from(height) * u64::from(target_width))
        .div_ceil(u64::from(width.max(1)));
    u32::try_from(scaled).unwrap_or(u32::MAX).max(1)
}

#[cfg(feature = "ffmpeg")]
mod video {
    use std::{path::Path, sync::OnceLock};

    use ffmpeg_next as ffmpeg;
    use image::RgbImage;
    use tracing::{debug, warn};

    use super::proportional_height;
    use crate::error::CodecError;

    // Limit packet processing to avoid spinning on streams that never
    // produce a frame
    const MAX_PACKETS: usize = 500;

    fn ensure_initialized() -> Result<(), CodecError> {
        static INIT: OnceLock<Result<(), String>> = OnceLock::new();
        INIT.get_or_init(|| {
            ffmpeg::init().map_err(|err| err.to_string())?;
            ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
            Ok(())
        })
        .clone()
        .map_err(CodecError::Unavailable)
    }

    /// Decode the first frame of `path`, scaled to `target_width` wide.
    pub(super) fn first_frame(
        path: &Path,
        target_width: u32,
    ) -> Result<RgbImage, CodecError> {
        ensure_initialized()?;

        let mut input = ffmpeg::format::input(&path)?;
        let (stream_index, parameters) = {
            let stream = input
                .streams()
                .best(ffmpeg::media::Type::Video)
                .ok_or_else(|| {
                    CodecError::Decode("no video stream found".to_string())
                })?;
            (stream.index(), stream.parameters())
        };

        let context =
            ffmpeg::codec::context::Context::from_parameters(parameters)?;
        let mut decoder = context.decoder().video()?;

        let (width, height) = (decoder.width(), decoder.height());
        if width == 0 || height == 0 {
            return Err(CodecError::Decode(format!(
                "invalid video dimensions {width}x{height}"
            )));
        }
        if decoder.format() == ffmpeg::format::Pixel::None {
            return Err(CodecError::Decode(
                "unspecified pixel format".to_string(),
            ));
        }

        let target_height = proportional_height(width, height, target_width);
        let mut scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg::format::Pixel::RGB24,
            target_width,
            target_height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )?;

        let mut decoded = ffmpeg::util::frame::video::Video::empty();
        let mut scaled = ffmpeg::util::frame::video::Video::empty();
        let mut packets = 0usize;

        for (stream, packet) in input.packets() {
            if stream.index() != stream_index {
                continue;
            }
            packets += 1;
            if packets > MAX_PACKETS {
                warn!(
                    path = %path.display(),
                    packets = MAX_PACKETS,
                    "no decodable frame before packet limit"
                );
                break;
            }
            if let Err(err) = decoder.send_packet(&packet) {
                debug!(error = %err, "failed to send packet");
                continue;
            }
            if decoder.receive_frame(&mut decoded).is_ok() {
                scaler.run(&decoded, &mut scaled)?;
                return frame_to_rgb(&scaled);
            }
        }

        decoder.send_eof()?;
        if decoder.receive_frame(&mut decoded).is_ok() {
            scaler.run(&decoded, &mut scaled)?;
            return frame_to_rgb(&scaled);
        }

        Err(CodecError::Decode(format!(
            "no frame decoded after {packets} packets"
        )))
    }

    fn frame_to_rgb(
        frame: &ffmpeg::util::frame::video::Video,
    ) -> Result<RgbImage, CodecError> {
        let width = frame.width();
        let height = frame.height();
        let stride = frame.stride(0);
        let data = frame.data(0);
        let row_len = width as usize * 3;

        // Strip per-row padding when the stride is wider than the pixels
        let pixels = if stride == row_len {
            data[..row_len * height as usize].to_vec()
        } else {
            let mut packed = Vec::with_capacity(row_len * height as usize);
            for row in data.chunks(stride).take(height as usize) {
                packed.extend_from_slice(&row[..row_len]);
            }
            packed
        };

        RgbImage::from_raw(width, height, pixels).ok_or_else(|| {
            CodecError::Decode(format!(
                "frame buffer too small for {width}x{height}"
            ))
        })
    }
}
