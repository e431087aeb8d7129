//! TensorBoard event file writer.

use prost::Message;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::media::{Media, encode_wav};
use super::proto::{self, event, hparams_plugin_data, summary_value};
use super::record::{RecordReader, RecordWriter};
use super::{EventWriter, SessionStatus};
use crate::error::{Result, RunlogError};
use crate::filename::EventFileLayout;
use crate::hparams::{HParamValue, HParamsRecord};

const FILE_VERSION: &str = "brain.Event:2";
const HPARAMS_PLUGIN: &str = "hparams";
const EXPERIMENT_TAG: &str = "_hparams_/experiment";
const SESSION_START_TAG: &str = "_hparams_/session_start_info";
const SESSION_END_TAG: &str = "_hparams_/session_end_info";

/// Distinguishes writers opened by the same process within the same second.
static FILE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn wall_time() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}

/// Writes TensorBoard event files through a buffered TFRecord stream.
pub struct TfEventWriter {
    path: PathBuf,
    records: Option<RecordWriter<BufWriter<File>>>,
    wrote_session_start: bool,
}

impl TfEventWriter {
    /// Create a new event file in `dir` named after `host` and the current time.
    pub fn create(dir: &Path, host: &str, layout: &EventFileLayout) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let now = chrono::Utc::now().timestamp();
        let pid = std::process::id().to_string();
        let seq = FILE_SEQUENCE.fetch_add(1, Ordering::Relaxed).to_string();
        let path = dir.join(layout.format(host, now, &[&pid, &seq]));

        let file = File::create(&path)?;
        let mut writer = Self {
            path,
            records: Some(RecordWriter::new(BufWriter::new(file))),
            wrote_session_start: false,
        };
        writer.write_event(0, event::What::FileVersion(FILE_VERSION.to_string()))?;
        tracing::debug!(path = %writer.path.display(), "opened event file");
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_event(&mut self, step: i64, what: event::What) -> Result<()> {
        let records = self
            .records
            .as_mut()
            .ok_or_else(|| RunlogError::writer("event file is already closed"))?;
        let event = proto::Event {
            wall_time: wall_time(),
            step,
            what: Some(what),
        };
        records.write_record(&event.encode_to_vec())?;
        Ok(())
    }

    fn write_summary(&mut self, step: i64, value: proto::SummaryValue) -> Result<()> {
        self.write_event(
            step,
            event::What::Summary(proto::Summary { value: vec![value] }),
        )
    }

    fn write_plugin_summary(&mut self, tag: &str, data: hparams_plugin_data::Data) -> Result<()> {
        let content = proto::HParamsPluginData {
            version: 0,
            data: Some(data),
        }
        .encode_to_vec();
        self.write_summary(
            0,
            proto::SummaryValue {
                tag: tag.to_string(),
                metadata: Some(proto::SummaryMetadata {
                    plugin_data: Some(proto::PluginData {
                        plugin_name: HPARAMS_PLUGIN.to_string(),
                        content,
                    }),
                }),
                value: None,
            },
        )
    }
}

fn hparam_to_proto(value: &HParamValue) -> (prost_types::Value, proto::DataType) {
    use prost_types::value::Kind;
    let (kind, data_type) = match value {
        HParamValue::Number(n) => (Kind::NumberValue(*n), proto::DataType::Float64),
        HParamValue::Text(s) => (Kind::StringValue(s.clone()), proto::DataType::String),
        HParamValue::Bool(b) => (Kind::BoolValue(*b), proto::DataType::Bool),
    };
    (prost_types::Value { kind: Some(kind) }, data_type)
}

impl EventWriter for TfEventWriter {
    fn write_scalar(&mut self, tag: &str, value: f32, step: i64) -> Result<()> {
        self.write_summary(
            step,
            proto::SummaryValue {
                tag: tag.to_string(),
                metadata: None,
                value: Some(summary_value::Value::SimpleValue(value)),
            },
        )
    }

    fn write_media(&mut self, tag: &str, media: &Media<'_>, step: i64) -> Result<()> {
        let value = match *media {
            Media::Audio {
                samples,
                sample_rate,
            } => summary_value::Value::Audio(proto::Audio {
                sample_rate: sample_rate as f32,
                num_channels: 1,
                length_frames: samples.len() as i64,
                encoded_audio_string: encode_wav(samples, sample_rate)?,
                content_type: "audio/wav".to_string(),
            }),
            Media::Image {
                encoded,
                height,
                width,
                colorspace,
            } => summary_value::Value::Image(proto::Image {
                height: height as i32,
                width: width as i32,
                colorspace: colorspace as i32,
                encoded_image_string: encoded.to_vec(),
            }),
        };
        self.write_summary(
            step,
            proto::SummaryValue {
                tag: tag.to_string(),
                metadata: None,
                value: Some(value),
            },
        )
    }

    fn write_hparams(&mut self, record: &HParamsRecord) -> Result<()> {
        let mut hparam_infos = Vec::with_capacity(record.hparams.len());
        let mut values = std::collections::BTreeMap::new();
        for (name, value) in &record.hparams {
            let (proto_value, data_type) = hparam_to_proto(value);
            hparam_infos.push(proto::HParamInfo {
                name: name.clone(),
                r#type: data_type as i32,
            });
            values.insert(name.clone(), proto_value);
        }
        let metric_infos = record
            .metrics
            .iter()
            .map(|tag| proto::MetricInfo {
                name: Some(proto::MetricName {
                    group: String::new(),
                    tag: tag.clone(),
                }),
            })
            .collect();

        self.write_plugin_summary(
            EXPERIMENT_TAG,
            hparams_plugin_data::Data::Experiment(proto::Experiment {
                hparam_infos,
                metric_infos,
                ..Default::default()
            }),
        )?;
        self.write_plugin_summary(
            SESSION_START_TAG,
            hparams_plugin_data::Data::SessionStartInfo(proto::SessionStartInfo {
                hparams: values,
                group_name: record.run_name.clone(),
                start_time_secs: wall_time(),
            }),
        )?;
        self.wrote_session_start = true;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(records) = self.records.as_mut() {
            records.flush()?;
        }
        Ok(())
    }

    fn close(&mut self, status: SessionStatus) -> Result<()> {
        if self.records.is_none() {
            return Ok(());
        }
        if self.wrote_session_start {
            let status = match status {
                SessionStatus::Success => proto::Status::Success,
                SessionStatus::Failure => proto::Status::Failure,
            };
            self.write_plugin_summary(
                SESSION_END_TAG,
                hparams_plugin_data::Data::SessionEndInfo(proto::SessionEndInfo {
                    status: status as i32,
                    end_time_secs: wall_time(),
                }),
            )?;
        }
        if let Some(mut records) = self.records.take() {
            records.flush()?;
        }
        tracing::debug!(path = %self.path.display(), "closed event file");
        Ok(())
    }
}

impl Drop for TfEventWriter {
    fn drop(&mut self) {
        if let Some(records) = self.records.as_mut() {
            let _ = records.flush();
        }
    }
}

/// Decode every complete event of an event file.
pub fn read_events(path: &Path) -> Result<Vec<proto::Event>> {
    let file = File::open(path)?;
    let mut events = Vec::new();
    for record in RecordReader::new(std::io::BufReader::new(file)) {
        let event = proto::Event::decode(record?.as_slice())
            .map_err(|e| RunlogError::writer(format!("undecodable event: {e}")))?;
        events.push(event);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scalar_of(event: &proto::Event) -> Option<(&str, f32)> {
        match &event.what {
            Some(event::What::Summary(summary)) => match &summary.value[0].value {
                Some(summary_value::Value::SimpleValue(v)) => {
                    Some((summary.value[0].tag.as_str(), *v))
                }
                _ => None,
            },
            _ => None,
        }
    }

    #[test]
    fn test_file_name_follows_layout() {
        let dir = TempDir::new().unwrap();
        let layout = EventFileLayout::default();
        let writer = TfEventWriter::create(dir.path(), "node07.cluster", &layout).unwrap();
        let name = writer.path().file_name().unwrap().to_str().unwrap();
        let parsed = layout.parse(name).unwrap();
        assert_eq!(parsed.host, "node07.cluster");
        assert_eq!(parsed.trailing[0], std::process::id().to_string());
    }

    #[test]
    fn test_scalars_survive_close() {
        let dir = TempDir::new().unwrap();
        let mut writer =
            TfEventWriter::create(dir.path(), "node07", &EventFileLayout::default()).unwrap();
        writer.write_scalar("loss/train", 0.5, 1).unwrap();
        writer.write_scalar("loss/train", 0.25, 2).unwrap();
        writer.close(SessionStatus::Success).unwrap();
        writer.close(SessionStatus::Success).unwrap();

        let events = read_events(writer.path()).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0].what,
            Some(event::What::FileVersion(FILE_VERSION.to_string()))
        );
        assert_eq!(scalar_of(&events[1]), Some(("loss/train", 0.5)));
        assert_eq!(events[2].step, 2);
        assert!(writer.write_scalar("late", 1.0, 3).is_err());
    }

    #[test]
    fn test_hparams_records_and_session_end() {
        let dir = TempDir::new().unwrap();
        let mut writer =
            TfEventWriter::create(dir.path(), "node07", &EventFileLayout::default()).unwrap();
        let record = HParamsRecord {
            hparams: vec![
                ("train.lr".into(), HParamValue::Number(0.01)),
                ("datetime".into(), HParamValue::Text("20240101-1200".into())),
            ],
            metrics: vec!["loss/test".into()],
            run_name: "run".into(),
        };
        writer.write_hparams(&record).unwrap();
        writer.close(SessionStatus::Failure).unwrap();

        let events = read_events(writer.path()).unwrap();
        let tags: Vec<String> = events
            .iter()
            .filter_map(|e| match &e.what {
                Some(event::What::Summary(s)) => Some(s.value[0].tag.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(tags, vec![EXPERIMENT_TAG, SESSION_START_TAG, SESSION_END_TAG]);

        let Some(event::What::Summary(summary)) = &events[3].what else {
            panic!("expected a summary");
        };
        let plugin = summary.value[0]
            .metadata
            .as_ref()
            .and_then(|m| m.plugin_data.as_ref())
            .unwrap();
        assert_eq!(plugin.plugin_name, HPARAMS_PLUGIN);
        let data = proto::HParamsPluginData::decode(plugin.content.as_slice()).unwrap();
        match data.data {
            Some(hparams_plugin_data::Data::SessionEndInfo(end)) => {
                assert_eq!(end.status, proto::Status::Failure as i32)
            }
            other => panic!("unexpected plugin data: {other:?}"),
        }
    }

    #[test]
    fn test_audio_summary() {
        let dir = TempDir::new().unwrap();
        let mut writer =
            TfEventWriter::create(dir.path(), "node07", &EventFileLayout::default()).unwrap();
        let samples = vec![0.1f32; 480];
        writer
            .write_media(
                "audio/pred",
                &Media::Audio {
                    samples: &samples,
                    sample_rate: 48_000,
                },
                5,
            )
            .unwrap();
        writer.flush().unwrap();

        let events = read_events(writer.path()).unwrap();
        let Some(event::What::Summary(summary)) = &events[1].what else {
            panic!("expected a summary");
        };
        match &summary.value[0].value {
            Some(summary_value::Value::Audio(audio)) => {
                assert_eq!(audio.sample_rate, 48_000.0);
                assert_eq!(audio.length_frames, 480);
                assert_eq!(audio.content_type, "audio/wav");
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }
}
