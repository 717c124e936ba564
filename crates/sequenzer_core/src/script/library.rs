//! Example Sequences
//!
//! Ready-made scripts shown to new users. Each one compiles with the
//! default limits.

/// A named example script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Example {
    pub name: &'static str,
    pub description: &'static str,
    pub source: &'static str,
}

const EXAMPLES: &[Example] = &[
    Example {
        name: "simple_dmx",
        description: "Switch channel 1 on for two seconds",
        source: "\
# Simple DMX example
write_dmx(1, 255)  # Channel 1 full brightness
sleep(2)           # Wait 2 seconds
write_dmx(1, 0)    # Channel 1 off
",
    },
    Example {
        name: "dmx_fade",
        description: "Fade channel 1 up and back down",
        source: "\
# Fade channel 1 in
for brightness in range(0, 256, 10):
    write_dmx(1, brightness)
    sleep(0.1)

sleep(1)

# Fade channel 1 out
for brightness in range(255, -1, -10):
    write_dmx(1, brightness)
    sleep(0.1)
",
    },
    Example {
        name: "sound_and_light",
        description: "Light channel 1 while intro.wav plays",
        source: "\
# Sound and light show
play_sound('intro.wav', 0.8)  # Intro at 80% volume
write_dmx(1, 255)             # Light on
wait_for_sound()              # Wait for the sound to finish
write_dmx(1, 0)               # Light off
",
    },
    Example {
        name: "complex_sequence",
        description: "Four channels, a strobe and music.wav",
        source: "\
# Set channels 1-4 to increasing levels
write_dmx(1, 64)
write_dmx(2, 128)
write_dmx(3, 192)
write_dmx(4, 255)
sleep(1)

# Strobe channel 1 over the music
play_sound('music.wav', 1.0)
for i in range(10):
    write_dmx(1, 255)
    sleep(0.1)
    write_dmx(1, 0)
    sleep(0.1)

# Everything to black
for channel in range(1, 5):
    write_dmx(channel, 0)
stop_sound()
",
    },
];

/// All bundled examples, in display order
pub fn examples() -> &'static [Example] {
    EXAMPLES
}

pub fn example(name: &str) -> Option<&'static Example> {
    EXAMPLES.iter().find(|e| e.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScriptLimits;
    use crate::script::compile;

    #[test]
    fn test_all_examples_compile() {
        let limits = ScriptLimits::default();
        for example in examples() {
            let script = compile(example.name, example.source, &limits)
                .unwrap_or_else(|e| panic!("{} failed to compile: {}", example.name, e));
            assert!(!script.program().is_empty());
            assert!(script.warnings().is_empty());
        }
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(example("dmx_fade").unwrap().name, "dmx_fade");
        assert!(example("sound_and_light").unwrap().source.contains("wait_for_sound"));
        assert!(example("nope").is_none());
    }
}
