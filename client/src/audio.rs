use std::path::Path;

use rubato::Resampler;

use crate::action::ActionError;

/// Mono audio normalised to [-1.0, 1.0].
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Clip {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decode a WAV file (integer or float PCM, any channel count), mixing down to mono.
pub fn decode_wav(path: &Path) -> Result<Clip, ActionError> {
    let decode_err = |e: hound::Error| ActionError::Decode(format!("{}: {e}", path.display()));

    let reader = hound::WavReader::open(path).map_err(decode_err)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(decode_err)?,
        hound::SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                return Err(ActionError::Unsupported(format!(
                    "{} bits per sample",
                    spec.bits_per_sample
                )));
            }
            let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(decode_err)?
        }
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok(Clip {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Frames per resampler call.
const CHUNK_SIZE: usize = 1024;

/// Resample a whole mono clip from `source_rate` to `target_rate`.
///
/// The clip is fed in fixed-size chunks; the final partial chunk is zero-padded
/// and its output trimmed to the proportional length.
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>, ActionError> {
    if source_rate == target_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if source_rate == 0 || target_rate == 0 {
        return Err(ActionError::Unsupported(format!(
            "sample rate {source_rate}Hz -> {target_rate}Hz"
        )));
    }

    use audioadapter_buffers::direct::SequentialSliceOfVecs;
    use rubato::{
        Async, FixedAsync, SincInterpolationParameters, SincInterpolationType, WindowFunction,
    };

    let ratio = target_rate as f64 / source_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Quadratic,
        oversampling_factor: 256,
        window: WindowFunction::Blackman2,
    };
    let mut resampler =
        Async::<f64>::new_sinc(ratio, 1.1, &params, CHUNK_SIZE, 1, FixedAsync::Input)
            .map_err(|e| ActionError::Decode(format!("creating resampler: {e}")))?;

    let mut output_all = Vec::with_capacity((samples.len() as f64 * ratio) as usize + CHUNK_SIZE);
    for chunk in samples.chunks(CHUNK_SIZE) {
        let mut frame: Vec<f64> = chunk.iter().map(|&s| f64::from(s)).collect();
        frame.resize(CHUNK_SIZE, 0.0);
        let input_data = vec![frame];
        let adapter = SequentialSliceOfVecs::new(&input_data, 1, CHUNK_SIZE)
            .map_err(|e| ActionError::Decode(format!("resample adapter: {e}")))?;

        let output = resampler
            .process(&adapter, 0, None)
            .map_err(|e| ActionError::Decode(format!("resampling: {e}")))?;
        let data = output.take_data();

        let keep = if chunk.len() < CHUNK_SIZE {
            ((chunk.len() as f64 * ratio).ceil() as usize).min(data.len())
        } else {
            data.len()
        };
        output_all.extend(data[..keep].iter().map(|&s| s.clamp(-1.0, 1.0) as f32));
    }

    Ok(output_all)
}
