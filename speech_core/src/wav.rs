use std::io::Cursor;

use anyhow::Context;

/// Encode PCM f32 samples as 16-bit PCM WAV (RIFF) bytes.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> anyhow::Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    // WAV header (44 bytes) + 2 bytes per sample
    let mut cursor = Cursor::new(Vec::<u8>::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| anyhow::anyhow!("wav write err: {e}"))?;

        const I16_MAX_F32: f32 = i16::MAX as f32;
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * I16_MAX_F32) as i16;
            writer
                .write_sample(v)
                .map_err(|e| anyhow::anyhow!("wav sample err: {e}"))?;
        }
        // `writer` drops here, which finalizes the WAV header/footer
    }

    Ok(cursor.into_inner())
}

/// Read playback duration in seconds from WAV bytes.
pub fn wav_duration_seconds(bytes: &[u8]) -> anyhow::Result<f32> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).context("not a valid WAV stream")?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        anyhow::bail!("WAV header reports zero sample rate");
    }
    Ok(reader.duration() as f32 / spec.sample_rate as f32)
}
