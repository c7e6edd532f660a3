//! File type codes and extension-based classification
//!
//! The engine tags every object with a `LIBMTP_filetype_t` code. Uploads must
//! supply one, so [`classify_filename`] guesses it from the extension. The guess
//! is only as good as the extension, which is good enough for devices that
//! sort files into folders by type.

use serde::Serialize;
use std::fmt;
use std::path::Path;

/// The engine's closed set of object types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FileType {
    Folder,
    Wav,
    Mp3,
    Wma,
    Ogg,
    Audible,
    Mp4,
    UndefinedAudio,
    Wmv,
    Avi,
    Mpeg,
    Asf,
    QuickTime,
    UndefinedVideo,
    Jpeg,
    Jfif,
    Tiff,
    Bmp,
    Gif,
    Pict,
    Png,
    VCalendar1,
    VCalendar2,
    VCard2,
    VCard3,
    WindowsImageFormat,
    WindowsExecutable,
    Text,
    Html,
    Firmware,
    Aac,
    MediaCard,
    Flac,
    Mp2,
    M4a,
    Doc,
    Xml,
    Xls,
    Ppt,
    Mht,
    Jp2,
    Jpx,
    Album,
    Playlist,
    Unknown,
}

/// Every variant, indexed by its engine code
const ALL: [FileType; 45] = [
    FileType::Folder,
    FileType::Wav,
    FileType::Mp3,
    FileType::Wma,
    FileType::Ogg,
    FileType::Audible,
    FileType::Mp4,
    FileType::UndefinedAudio,
    FileType::Wmv,
    FileType::Avi,
    FileType::Mpeg,
    FileType::Asf,
    FileType::QuickTime,
    FileType::UndefinedVideo,
    FileType::Jpeg,
    FileType::Jfif,
    FileType::Tiff,
    FileType::Bmp,
    FileType::Gif,
    FileType::Pict,
    FileType::Png,
    FileType::VCalendar1,
    FileType::VCalendar2,
    FileType::VCard2,
    FileType::VCard3,
    FileType::WindowsImageFormat,
    FileType::WindowsExecutable,
    FileType::Text,
    FileType::Html,
    FileType::Firmware,
    FileType::Aac,
    FileType::MediaCard,
    FileType::Flac,
    FileType::Mp2,
    FileType::M4a,
    FileType::Doc,
    FileType::Xml,
    FileType::Xls,
    FileType::Ppt,
    FileType::Mht,
    FileType::Jp2,
    FileType::Jpx,
    FileType::Album,
    FileType::Playlist,
    FileType::Unknown,
];

impl FileType {
    /// Decode an engine code; out-of-range codes become `Unknown`
    pub fn from_raw(code: i32) -> Self {
        usize::try_from(code)
            .ok()
            .and_then(|index| ALL.get(index).copied())
            .unwrap_or(FileType::Unknown)
    }

    /// The engine code for this type
    pub fn raw(self) -> i32 {
        self as i32
    }

    pub fn is_folder(self) -> bool {
        matches!(self, FileType::Folder)
    }

    pub fn is_audio(self) -> bool {
        matches!(
            self,
            FileType::Wav
                | FileType::Mp3
                | FileType::Wma
                | FileType::Ogg
                | FileType::Audible
                | FileType::Mp4
                | FileType::UndefinedAudio
                | FileType::Aac
                | FileType::Flac
                | FileType::Mp2
                | FileType::M4a
        )
    }

    pub fn is_video(self) -> bool {
        matches!(
            self,
            FileType::Wmv
                | FileType::Mp4
                | FileType::Avi
                | FileType::Mpeg
                | FileType::Asf
                | FileType::QuickTime
                | FileType::UndefinedVideo
        )
    }

    pub fn is_image(self) -> bool {
        matches!(
            self,
            FileType::Jpeg
                | FileType::Jfif
                | FileType::Tiff
                | FileType::Bmp
                | FileType::Gif
                | FileType::Pict
                | FileType::Png
                | FileType::WindowsImageFormat
                | FileType::Jp2
                | FileType::Jpx
        )
    }

    /// Human-readable description of the type
    pub fn description(self) -> &'static str {
        match self {
            FileType::Folder => "Folder",
            FileType::Wav => "RIFF WAVE file",
            FileType::Mp3 => "ISO MPEG-1 Audio Layer 3",
            FileType::Wma => "Microsoft Windows Media Audio",
            FileType::Ogg => "Ogg container format",
            FileType::Audible => "Audible.com Audio Codec",
            FileType::Mp4 => "MPEG-4 Part 14 Container Format (Audio+Video Emphasis)",
            FileType::UndefinedAudio => "Undefined audio file",
            FileType::Wmv => "Microsoft Windows Media Video",
            FileType::Avi => "Audio Video Interleave",
            FileType::Mpeg => "MPEG video stream",
            FileType::Asf => "Microsoft Advanced Systems Format",
            FileType::QuickTime => "Apple Quicktime container format",
            FileType::UndefinedVideo => "Undefined video file",
            FileType::Jpeg => "JPEG file",
            FileType::Jfif => "JFIF file",
            FileType::Tiff => "TIFF bitmap file",
            FileType::Bmp => "BMP bitmap file",
            FileType::Gif => "GIF bitmap file",
            FileType::Pict => "PICT bitmap file",
            FileType::Png => "Portable Network Graphics",
            FileType::VCalendar1 => "VCalendar version 1",
            FileType::VCalendar2 => "VCalendar version 2",
            FileType::VCard2 => "VCard version 2",
            FileType::VCard3 => "VCard version 3",
            FileType::WindowsImageFormat => "Windows Image Format",
            FileType::WindowsExecutable => "Windows executable",
            FileType::Text => "Text file",
            FileType::Html => "HTML file",
            FileType::Firmware => "Firmware file",
            FileType::Aac => "Advanced Audio Coding (AAC)/MPEG-2 Part 7/MPEG-4 Part 3",
            FileType::MediaCard => "Media Card",
            FileType::Flac => "Free Lossless Audio Codec (FLAC)",
            FileType::Mp2 => "ISO MPEG-1 Audio Layer 2",
            FileType::M4a => "MPEG-4 Part 14 Container Format (Audio Emphasis)",
            FileType::Doc => "Microsoft Word Document",
            FileType::Xml => "XML Document",
            FileType::Xls => "Microsoft Excel Spreadsheet",
            FileType::Ppt => "Microsoft Powerpoint Presentation",
            FileType::Mht => "MHT Compiled HTML Document",
            FileType::Jp2 => "JPEG 2000",
            FileType::Jpx => "JPEG 2000 Extended",
            FileType::Album => "Abstract Album file",
            FileType::Playlist => "Abstract Playlist file",
            FileType::Unknown => "Unknown filetype",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Guess the engine file type from a file name or path.
///
/// Only the final extension counts and it is compared case-insensitively.
/// Names without an extension, or with one not listed here, are `Unknown`.
pub fn classify_filename<P: AsRef<Path>>(path: P) -> FileType {
    let extension = match path.as_ref().extension().and_then(|ext| ext.to_str()) {
        Some(ext) => ext.to_lowercase(),
        None => return FileType::Unknown,
    };

    match extension.as_str() {
        "wav" | "wave" => FileType::Wav,
        "mp3" => FileType::Mp3,
        "wma" => FileType::Wma,
        "ogg" => FileType::Ogg,
        "aac" => FileType::Aac,
        "mp2" => FileType::Mp2,
        "flac" => FileType::Flac,
        "m4a" => FileType::M4a,
        "mp4" => FileType::Mp4,
        "wmv" => FileType::Wmv,
        "avi" => FileType::Avi,
        "mpeg" | "mpg" => FileType::Mpeg,
        "asf" => FileType::Asf,
        "qt" | "mov" => FileType::QuickTime,
        "jpeg" | "jpg" => FileType::Jpeg,
        "jfif" => FileType::Jfif,
        "tiff" | "tif" => FileType::Tiff,
        "bmp" => FileType::Bmp,
        "gif" => FileType::Gif,
        "pict" | "pic" => FileType::Pict,
        "png" => FileType::Png,
        "wmf" => FileType::WindowsImageFormat,
        "ics" => FileType::VCalendar2,
        "exe" | "com" | "bat" | "dll" | "sys" => FileType::WindowsExecutable,
        "doc" => FileType::Doc,
        "xml" => FileType::Xml,
        "xls" => FileType::Xls,
        "ppt" => FileType::Ppt,
        "mht" => FileType::Mht,
        "jp2" => FileType::Jp2,
        "jpx" => FileType::Jpx,
        _ => FileType::Unknown,
    }
}
