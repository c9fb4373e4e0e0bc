use anyhow::Result;
use skiff_domain::{format_log_event, LogEvent, LogStream};

use super::{ContainerLogs, ContainerRuntime};

/// Fetch a container's logs and merge them into one time-ordered sequence.
pub fn get_container_logs(runtime: &dyn ContainerRuntime, container: &str) -> Result<Vec<LogEvent>> {
    Ok(parse_container_logs(&runtime.container_logs(container)?))
}

/// Merge timestamped stdout and stderr lines into events sorted by time.
///
/// Invalid UTF-8 is replaced rather than rejected and blank lines are
/// dropped. Events with equal timestamps keep stdout before stderr.
pub fn parse_container_logs(logs: &ContainerLogs) -> Vec<LogEvent> {
    let mut events = Vec::new();
    for (stream, raw) in [
        (LogStream::Stdout, &logs.stdout),
        (LogStream::Stderr, &logs.stderr),
    ] {
        let text = String::from_utf8_lossy(raw);
        for line in text.split('\n') {
            if line.is_empty() {
                continue;
            }
            let (timestamp, message) = line.split_once(' ').unwrap_or((line, ""));
            events.push(format_log_event(
                stream,
                message,
                Some(timestamp.trim_end_matches('Z').to_string()),
            ));
        }
    }
    events.sort_by(|a, b| a.time.cmp(&b.time));
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaved_streams_merge_in_time_order() {
        let logs = ContainerLogs {
            stdout: b"2024-01-01T00:00:01.000000000Z first out\n\
                      2024-01-01T00:00:03.000000000Z second out\n"
                .to_vec(),
            stderr: b"2024-01-01T00:00:02.000000000Z first err\n\
                      2024-01-01T00:00:04.000000000Z second err\n"
                .to_vec(),
        };
        let events = parse_container_logs(&logs);
        let summary: Vec<_> = events
            .iter()
            .map(|event| (event.stream, event.message.as_str()))
            .collect();
        assert_eq!(
            summary,
            [
                (LogStream::Stdout, "first out"),
                (LogStream::Stderr, "first err"),
                (LogStream::Stdout, "second out"),
                (LogStream::Stderr, "second err"),
            ]
        );
        assert!(events.windows(2).all(|pair| pair[0].time <= pair[1].time));
        assert_eq!(events[0].time, "2024-01-01T00:00:01.000000000");
    }

    #[test]
    fn blank_lines_drop_and_bad_bytes_are_replaced() {
        let mut stdout = b"2024-01-01T00:00:01.000000000Z caf".to_vec();
        stdout.extend_from_slice(&[0xff, 0xfe]);
        stdout.extend_from_slice(b"\n\n\n2024-01-01T00:00:02.000000000Z  padded\n");
        let logs = ContainerLogs {
            stdout,
            stderr: Vec::new(),
        };
        let events = parse_container_logs(&logs);
        assert_eq!(events.len(), 2);
        assert!(events[0].message.starts_with("caf"));
        assert!(events[0].message.contains('\u{fffd}'));
        assert_eq!(events[1].message, " padded");
    }

    #[test]
    fn lines_without_message_keep_their_timestamp() {
        let logs = ContainerLogs {
            stdout: Vec::new(),
            stderr: b"2024-01-01T00:00:01.000000000Z\n".to_vec(),
        };
        let events = parse_container_logs(&logs);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stream, LogStream::Stderr);
        assert_eq!(events[0].message, "");
        assert_eq!(events[0].time, "2024-01-01T00:00:01.000000000");
    }
}
