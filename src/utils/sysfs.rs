use std::fs::{read_dir, File};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Lists the IIO devices under `root` whose `name` file equals `driver`.
///
/// The `dht11` kernel driver (loaded with `dtoverlay=dht11,gpiopin=N`) also
/// handles the DHT22/AM2302 and exposes:
///
/// - `name`: `dht11`
/// - `in_temp_input`: temperature in milli-degrees Celsius
/// - `in_humidityrelative_input`: relative humidity in milli-percent
/// - `of_node`: link to the device-tree node, named `dht11@<pin in hex>`
///
/// Reads of the value files fail with `EIO` whenever the sensor misses a
/// transfer, which happens regularly.
///
/// Kernel IIO sysfs ABI: https://www.kernel.org/doc/Documentation/ABI/testing/sysfs-bus-iio
pub fn find_iio_devices(root: &Path, driver: &str) -> Vec<PathBuf> {
    let Ok(dir) = read_dir(root) else {
        return Vec::new();
    };

    let mut devices: Vec<PathBuf> = dir
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| get_file_line(&path.join("name"), 16).as_deref() == Some(driver))
        .collect();
    devices.sort();
    devices
}

/// Device-tree node name of an IIO device, e.g. `dht11@4`.
pub fn of_node_name(device: &Path) -> Option<String> {
    let target = std::fs::read_link(device.join("of_node")).ok()?;
    target.file_name()?.to_str().map(str::to_string)
}

// Read arbitrary string data.
pub fn get_file_line(file: &Path, capacity: usize) -> Option<String> {
    let mut reader = String::with_capacity(capacity);
    let mut f = File::open(file).ok()?;
    f.read_to_string(&mut reader).ok()?;
    reader.truncate(reader.trim_end().len());
    Some(reader)
}

/// Designed for reading an `i32` from a sysfs attribute.
fn read_number_from_file<N>(file: &Path) -> Option<N>
where
    N: std::str::FromStr,
{
    let mut reader = [0u8; 32];
    let mut f = File::open(file).ok()?;
    let n = f.read(&mut reader).ok()?;
    // parse and trim would complain about `\0`.
    let number = std::str::from_utf8(&reader[..n]).ok()?;
    number.trim().parse().ok()
}

/// Reads a milli-unit IIO channel (`in_temp_input`, `in_humidityrelative_input`).
#[inline]
pub fn read_milli(file: &Path) -> Option<f64> {
    convert_milli(read_number_from_file(file))
}

#[inline]
fn convert_milli(value: Option<i32>) -> Option<f64> {
    value.map(|n| f64::from(n) / 1000f64)
}
