//! Pool reporting.
//!
//! Descriptors combine a device's identity with its allocation state for
//! display; the table writer renders the fleet the way operators expect to
//! read it, sorted by state then serial.

use serde::{Deserialize, Serialize};

use droidpool_bridge::{Device, DeviceSelector};

/// Where a serial sits in the pool, exactly one per known serial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationState {
    /// Handed out to a caller.
    Allocated,
    /// In the availability queue.
    Available,
    /// Mid readiness-probe.
    Checking,
    /// Visible but excluded by the global device filter.
    Ignored,
    /// Visible on the bridge but neither available nor allocated.
    Unavailable,
}

impl AllocationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationState::Allocated => "Allocated",
            AllocationState::Available => "Available",
            AllocationState::Checking => "Checking",
            AllocationState::Ignored => "Ignored",
            AllocationState::Unavailable => "Unavailable",
        }
    }
}

/// One row of the fleet view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub serial: String,
    pub state: AllocationState,
    pub product: Option<String>,
    pub variant: Option<String>,
    pub build_id: Option<String>,
    pub sdk_version: Option<u32>,
    pub battery: Option<u32>,
}

impl DeviceDescriptor {
    pub(crate) fn new(
        device: &Device,
        state: AllocationState,
        selector: &dyn DeviceSelector,
    ) -> Self {
        Self {
            serial: device.serial.clone(),
            state,
            product: selector.device_product(device),
            variant: selector.device_variant(device),
            build_id: device.build_id.clone(),
            sdk_version: device.sdk_version,
            battery: selector.battery_level(device),
        }
    }
}

/// Sort for display: by state name ascending, then serial ascending.
pub(crate) fn sort_descriptors(descriptors: &mut [DeviceDescriptor]) {
    descriptors.sort_by(|a, b| {
        a.state
            .as_str()
            .cmp(b.state.as_str())
            .then_with(|| a.serial.cmp(&b.serial))
    });
}

fn display<T: ToString>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Render descriptors as an aligned text table.
pub(crate) fn format_device_table(descriptors: &[DeviceDescriptor]) -> String {
    let header = ["Serial", "State", "Product", "Variant", "Build", "Battery"];
    let mut rows: Vec<[String; 6]> = vec![header.map(String::from)];
    for d in descriptors {
        rows.push([
            d.serial.clone(),
            d.state.as_str().to_string(),
            display(&d.product),
            display(&d.variant),
            display(&d.build_id),
            display(&d.battery),
        ]);
    }

    let mut widths = [0usize; 6];
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    for row in &rows {
        let mut line = String::new();
        for (cell, width) in row.iter().zip(widths.iter()) {
            line.push_str(cell);
            line.extend(std::iter::repeat(' ').take(width - cell.len() + 2));
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(serial: &str, state: AllocationState) -> DeviceDescriptor {
        DeviceDescriptor {
            serial: serial.to_string(),
            state,
            product: None,
            variant: None,
            build_id: None,
            sdk_version: None,
            battery: None,
        }
    }

    #[test]
    fn sorts_by_state_then_serial() {
        let mut rows = vec![
            descriptor("Z9", AllocationState::Unavailable),
            descriptor("B2", AllocationState::Allocated),
            descriptor("A1", AllocationState::Available),
            descriptor("A0", AllocationState::Allocated),
        ];
        sort_descriptors(&mut rows);
        let order: Vec<_> = rows.iter().map(|d| d.serial.as_str()).collect();
        assert_eq!(order, vec!["A0", "B2", "A1", "Z9"]);
    }

    #[test]
    fn table_has_aligned_columns() {
        let mut row = descriptor("HT85X1A00342", AllocationState::Available);
        row.product = Some("husky".into());
        row.battery = Some(87);
        let table = format_device_table(&[row, descriptor("A1", AllocationState::Allocated)]);

        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Serial"));
        // "State" starts at the same column in every line
        let col = lines[0].find("State").unwrap();
        assert_eq!(&lines[1][col..col + 9], "Available");
        assert_eq!(&lines[2][col..col + 9], "Allocated");
        assert!(lines[1].contains("87"));
        assert!(lines[2].contains("unknown"));
    }

    #[test]
    fn empty_pool_prints_header_only() {
        let table = format_device_table(&[]);
        assert_eq!(table.lines().count(), 1);
    }
}
