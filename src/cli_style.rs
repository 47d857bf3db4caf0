//! Terminal styling for the voicegate CLI

use owo_colors::OwoColorize;

use crate::protocol::ReferenceAudioInfo;
use crate::transcode::AudioInfo;

/// Check if terminal supports colors
pub fn supports_color() -> bool {
    supports_color::on(supports_color::Stream::Stdout).is_some()
}

pub fn get_banner() -> &'static str {
    r#"
  ██    ██  ██████  ██  ██████ ███████  ██████   █████  ████████ ███████
  ██    ██ ██    ██ ██ ██      ██      ██       ██   ██    ██    ██
  ██    ██ ██    ██ ██ ██      █████   ██   ███ ███████    ██    █████
   ██  ██  ██    ██ ██ ██      ██      ██    ██ ██   ██    ██    ██
    ████    ██████  ██  ██████ ███████  ██████  ██   ██    ██    ███████

                 Voice-Cloning Text-to-Speech Gateway
"#
}

/// Print the banner with gradient colors
pub fn print_banner() {
    let banner = get_banner();

    if supports_color() {
        for (i, line) in banner.lines().enumerate() {
            match i % 6 {
                0 => println!("{}", line.bright_magenta()),
                1 => println!("{}", line.magenta()),
                2 => println!("{}", line.bright_blue()),
                3 => println!("{}", line.blue()),
                4 => println!("{}", line.cyan()),
                _ => println!("{}", line.bright_cyan()),
            }
        }
    } else {
        println!("{}", banner);
    }
}

/// Print a styled box with title
pub fn print_box(title: &str, content: &[(&str, &str)]) {
    let width: usize = 60;
    let title_width = title.len() + 4;
    let padding = width.saturating_sub(title_width) / 2;

    println!("╔{}╗", "═".repeat(width));
    println!("║{}{}", " ".repeat(padding), title.bright_cyan().bold());
    println!("╠{}╣", "═".repeat(width));

    for (label, value) in content {
        println!("║  {}: {}", label.bright_blue(), value);
    }

    println!("╚{}╝", "═".repeat(width));
}

pub fn print_section(title: &str) {
    if supports_color() {
        println!("\n{}", "━".repeat(60).bright_black());
        println!("  {}", title.bright_cyan().bold());
        println!("{}", "━".repeat(60).bright_black());
    } else {
        println!("\n{}", "━".repeat(60));
        println!("  {}", title);
        println!("{}", "━".repeat(60));
    }
}

pub fn print_success(message: &str) {
    if supports_color() {
        println!("{} {}", "✓".bright_green().bold(), message.green());
    } else {
        println!("[OK] {}", message);
    }
}

pub fn print_error(message: &str) {
    if supports_color() {
        eprintln!("{} {}", "✗".bright_red().bold(), message.red());
    } else {
        eprintln!("[ERR] {}", message);
    }
}

pub fn print_warning(message: &str) {
    if supports_color() {
        println!("{} {}", "⚠".bright_yellow().bold(), message.yellow());
    } else {
        println!("[WARN] {}", message);
    }
}

pub fn print_info(message: &str) {
    if supports_color() {
        println!("{} {}", "ℹ".bright_blue().bold(), message.bright_white());
    } else {
        println!("[INFO] {}", message);
    }
}

/// Human-readable byte size
pub fn format_size(bytes: u64) -> String {
    const MB: f64 = 1024.0 * 1024.0;
    if bytes as f64 >= MB {
        format!("{:.2} MB", bytes as f64 / MB)
    } else {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    }
}

/// One line describing a decoded clip, e.g. `3.20 s, 22050 Hz, 1 ch`
pub fn format_audio_info(info: &AudioInfo) -> String {
    format!(
        "{:.2} s, {} Hz, {} ch",
        info.duration_secs, info.sample_rate, info.channels
    )
}

/// Print the reference library listing; `details` runs alongside `clips`.
pub fn print_reference_list(clips: &[ReferenceAudioInfo], details: &[Option<AudioInfo>]) {
    if clips.is_empty() {
        print_warning("no reference audio found");
        return;
    }

    print_section(&format!("Reference audio ({} files)", clips.len()));
    for (clip, info) in clips.iter().zip(details) {
        let format = info
            .as_ref()
            .map(format_audio_info)
            .unwrap_or_else(|| "unreadable".to_string());
        if supports_color() {
            println!(
                "  {} {:<32} {:>10}  {}",
                "♪".bright_magenta(),
                clip.filename.bright_white(),
                format_size(clip.size),
                format.bright_black()
            );
        } else {
            println!(
                "  {:<32} {:>10}  {}",
                clip.filename,
                format_size(clip.size),
                format
            );
        }
    }
    println!();
}

/// Print startup info for server
pub fn print_server_startup(host: &str, port: u16, engine: &str, slots: usize, ffmpeg: bool) {
    print_banner();

    let port_str = port.to_string();
    let slots_str = slots.to_string();
    let info = vec![
        ("Host", host),
        ("Port", port_str.as_str()),
        ("Engine", engine),
        ("Engine slots", slots_str.as_str()),
        ("MP3 encoder", if ffmpeg { "ffmpeg" } else { "unavailable" }),
    ];

    print_box("Server Configuration", &info);

    println!();
    if !ffmpeg {
        print_warning("ffmpeg not found, mp3 requests will be served as wav");
    }
    print_success(&format!("Server ready at http://{}:{}/", host, port));
    println!();

    if supports_color() {
        println!("{}", "Press Ctrl+C to stop".bright_black());
    } else {
        println!("Press Ctrl+C to stop");
    }
}
