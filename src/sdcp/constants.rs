// MIT License
//
// Copyright (c) 2025 Takatoshi Kondo
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Code tables of the SDCP protocol and their human-readable descriptions.

use crate::sdcp::command::Opcode;

/// `CurrentStatus` values of the machine.
pub mod machine_status {
    pub const IDLE: i64 = 0;
    pub const PRINTING: i64 = 1;
    pub const FILE_TRANSFERRING: i64 = 2;
    pub const EXPOSURE_TESTING: i64 = 3;
    pub const DEVICES_TESTING: i64 = 4;
}

/// `FileTransferInfo.Status` values.
pub mod file_transfer_status {
    pub const IDLE: i64 = 0;
    pub const TRANSFERRING: i64 = 1;
    pub const COMPLETED: i64 = 2;
    pub const FAILED: i64 = 3;
}

/// `PrintInfo.Status` values.
pub mod print_status {
    pub const IDLE: i64 = 0;
    pub const HOMING: i64 = 1;
    pub const DROPPING: i64 = 2;
    pub const EXPOSURING: i64 = 3;
    pub const LIFTING: i64 = 4;
    pub const PAUSING: i64 = 5;
    pub const PAUSED: i64 = 6;
    pub const STOPPING: i64 = 7;
    pub const STOPPED: i64 = 8;
    pub const COMPLETE: i64 = 9;
    pub const FILE_CHECKING: i64 = 10;
}

pub fn machine_status_description(code: i64) -> Option<&'static str> {
    Some(match code {
        0 => "Idle",
        1 => "Printing",
        2 => "File Transferring",
        3 => "Exposure Testing",
        4 => "Devices Self-Testing",
        _ => return None,
    })
}

pub fn print_status_description(code: i64) -> Option<&'static str> {
    Some(match code {
        0 => "Idle",
        1 => "Resetting",
        2 => "Descending",
        3 => "Exposing",
        4 => "Lifting",
        5 => "Pausing",
        6 => "Paused",
        7 => "Stopping",
        8 => "Stopped",
        9 => "Print Completed",
        10 => "File Checking",
        _ => return None,
    })
}

/// `PrintInfo.ErrorNumber` values.
pub fn print_error_description(code: i64) -> Option<&'static str> {
    Some(match code {
        0 => "Normal",
        1 => "File MD5 Check Failed",
        2 => "File Read Failed",
        3 => "Resolution Mismatch",
        4 => "Format Mismatch",
        5 => "Machine Model Mismatch",
        _ => return None,
    })
}

/// `TaskStatus` of a historical task.
pub fn task_status_description(code: i64) -> Option<&'static str> {
    Some(match code {
        0 => "Other Status",
        1 => "Completed",
        2 => "Exceptional Status",
        3 => "Stopped",
        _ => return None,
    })
}

/// `ErrorStatusReason` of a historical task.
pub fn task_error_description(code: i64) -> Option<&'static str> {
    Some(match code {
        0 => "Normal",
        1 => "Over-temperature",
        2 => "Strain Gauge Calibration Failed",
        3 => "Resin Level Low Detected",
        4 => "The volume of resin required by the model exceeds the maximum capacity of the resin vat",
        5 => "No Resin Detected",
        6 => "Foreign Object Detected",
        7 => "Auto-leveling Failed",
        8 => "Model Detachment Detected",
        9 => "Strain Gauge Not Connected",
        10 => "LCD Screen Connection Abnormal",
        11 => "The cumulative release film usage has reached the maximum value",
        12 => "USB drive detected as removed, printing has been stopped",
        13 => "Detection of X-axis motor anomaly, printing has been stopped",
        14 => "Detection of Z-axis motor anomaly, printing has been stopped",
        15 => "The resin level has been detected to exceed the maximum value, and printing has been stopped",
        16 => "Resin level detected as too low, printing has been stopped",
        17 => "Home position calibration failed, please check if the motor or limit switch is functioning properly",
        18 => "A model is detected on the platform; please clean it and then restart printing",
        19 => "Printing Exception",
        20 => "Motor Movement Abnormality",
        21 => "No model detected, please troubleshoot",
        22 => "Warping of the model detected, please investigate",
        23 => "Deprecated",
        24 => "Error File",
        25 => "Camera Error. Please check if the camera is properly connected, or you can also disable this feature to continue printing",
        26 => "Network Connection Error. Please check if your network connection is stable, or you can also disable this feature to continue printing",
        27 => "Server Connection Failed. Please contact our customer support, or you can also disable this feature to continue printing",
        28 => "This printer is not bound to an app. To perform time-lapse photography, please first enable the remote control feature, or you can also disable this feature to continue printing",
        29 => "Please check the installation of the 'automatic material extraction / feeding machine'",
        30 => "The resin in the container is running low. Add more resin to automatically close this notification, or click 'Stop Auto Feeding' to continue printing",
        31 => "Please ensure that the automatic material extraction/feeding machine is correctly installed and the data cable is connected",
        32 => "Automatic material extraction timeout, please check if the resin tube is blocked",
        33 => "Resin vat temperature sensor not connected",
        34 => "Resin vat temperature sensor indicates an over-temperature condition",
        _ => return None,
    })
}

/// `ErrorCode` carried by `sdcp/error/{id}` broadcasts.
pub fn error_code_description(code: i64) -> Option<&'static str> {
    Some(match code {
        1 => "File Transfer MD5 Check Failed",
        2 => "File format is incorrect",
        _ => return None,
    })
}

/// Reason for a non-zero `Ack` in the reply to `opcode`.
///
/// Opcodes without a dedicated table fall back to a generic text.
pub fn ack_reason(opcode: u16, ack: i64) -> &'static str {
    let specific = match Opcode::from_code(opcode) {
        Some(Opcode::CancelUpload) => match ack {
            1 => Some("The printer is not currently transferring files"),
            2 => Some("The printer is already in the file verification phase"),
            3 => Some("File not found"),
            _ => None,
        },
        Some(Opcode::VideoStream) => match ack {
            1 => Some("Exceeded maximum number of video streams"),
            2 => Some("Camera does not exist"),
            _ => None,
        },
        _ => None,
    };
    specific.unwrap_or("Command rejected by the printer")
}
