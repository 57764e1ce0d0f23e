use std::fmt;
use std::time::Duration;

use log::{debug, info, trace, warn};
use rusb::{Device, DeviceHandle, Direction, TransferType, UsbContext};

use crate::error::Result;

/// Endpoints used when the configuration descriptor does not advertise any.
pub const DEFAULT_OUT_ENDPOINT: u8 = 0x01;
pub const DEFAULT_IN_ENDPOINT: u8 = 0x81;

/// Moves raw command/response packets to and from the attenuator.
pub trait Transport {
    fn write(&mut self, data: &[u8]) -> Result<usize>;
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;
}

#[derive(Debug, Clone)]
pub struct UsbDeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub bus_number: u8,
    pub device_address: u8,
}

impl UsbDeviceDescriptor {
    /// String descriptors are left empty when the device cannot be opened.
    pub fn new(device: &Device<rusb::Context>) -> Result<Self> {
        let device_descriptor = device.device_descriptor()?;

        let (manufacturer, product, serial_number) = match device.open() {
            Ok(handle) => (
                get_string_descriptor(&handle, device_descriptor.manufacturer_string_index()),
                get_string_descriptor(&handle, device_descriptor.product_string_index()),
                get_string_descriptor(&handle, device_descriptor.serial_number_string_index()),
            ),
            Err(e) => {
                debug!(
                    "Cannot open {:04X}:{:04X} for string descriptors: {}",
                    device_descriptor.vendor_id(),
                    device_descriptor.product_id(),
                    e
                );
                (None, None, None)
            }
        };

        Ok(UsbDeviceDescriptor {
            vendor_id: device_descriptor.vendor_id(),
            product_id: device_descriptor.product_id(),
            manufacturer,
            product,
            serial_number,
            bus_number: device.bus_number(),
            device_address: device.address(),
        })
    }

    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl fmt::Display for UsbDeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bus {:03} Device {:03}: VID: 0x{:04X}, PID: 0x{:04X}, Manufacturer: {}, Product: {}, Serial: {}",
            self.bus_number,
            self.device_address,
            self.vendor_id,
            self.product_id,
            self.manufacturer.as_deref().unwrap_or("-"),
            self.product.as_deref().unwrap_or("-"),
            self.serial_number.as_deref().unwrap_or("-"),
        )
    }
}

fn get_string_descriptor(handle: &DeviceHandle<rusb::Context>, index: Option<u8>) -> Option<String> {
    index.map(|idx| {
        handle
            .read_string_descriptor_ascii(idx)
            .unwrap_or_else(|_| String::from("Unknown"))
    })
}

pub fn list_usb_devices() -> Result<Vec<UsbDeviceDescriptor>> {
    let context = rusb::Context::new()?;
    let devices = context.devices()?;

    let mut device_list = Vec::new();
    for device in devices.iter() {
        match UsbDeviceDescriptor::new(&device) {
            Ok(descriptor) => device_list.push(descriptor),
            Err(e) => debug!("Skipping device on bus {}: {}", device.bus_number(), e),
        }
    }

    Ok(device_list)
}

pub fn find_devices_by_vid_pid(vendor_id: u16, product_id: u16) -> Result<Vec<Device<rusb::Context>>> {
    let context = rusb::Context::new()?;
    let devices = context.devices()?;

    let mut found = Vec::new();
    for device in devices.iter() {
        let device_descriptor = device.device_descriptor()?;
        if device_descriptor.vendor_id() == vendor_id && device_descriptor.product_id() == product_id {
            debug!(
                "Found {:04X}:{:04X} at bus {} address {}",
                vendor_id,
                product_id,
                device.bus_number(),
                device.address()
            );
            found.push(device);
        }
    }

    Ok(found)
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndpointInfo {
    pub address: u8,
    pub interface: u8,
    pub direction: Direction,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
}

impl EndpointInfo {
    fn fallback(address: u8, direction: Direction) -> Self {
        EndpointInfo {
            address,
            interface: 0,
            direction,
            transfer_type: TransferType::Bulk,
            max_packet_size: crate::protocol::PACKET_SIZE as u16,
        }
    }

    fn carries_data(&self, direction: Direction) -> bool {
        self.direction == direction
            && matches!(self.transfer_type, TransferType::Bulk | TransferType::Interrupt)
    }
}

impl fmt::Display for EndpointInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Endpoint Address: 0x{:02X}, Interface: {}, Direction: {:?}, Transfer Type: {:?}, Max Packet Size: {}",
            self.address, self.interface, self.direction, self.transfer_type, self.max_packet_size
        )
    }
}

fn enumerate_endpoints(device: &Device<rusb::Context>) -> Vec<EndpointInfo> {
    let mut endpoints = Vec::new();
    if let Ok(config_descriptor) = device.config_descriptor(0) {
        for interface in config_descriptor.interfaces() {
            for interface_descriptor in interface.descriptors() {
                for endpoint in interface_descriptor.endpoint_descriptors() {
                    endpoints.push(EndpointInfo {
                        address: endpoint.address(),
                        interface: interface_descriptor.interface_number(),
                        direction: endpoint.direction(),
                        transfer_type: endpoint.transfer_type(),
                        max_packet_size: endpoint.max_packet_size(),
                    });
                }
            }
        }
    }
    endpoints
}

/// Picks the first bulk or interrupt endpoint in each direction.
pub fn select_endpoints(endpoints: &[EndpointInfo]) -> (EndpointInfo, EndpointInfo) {
    let out = endpoints
        .iter()
        .find(|ep| ep.carries_data(Direction::Out))
        .cloned()
        .unwrap_or_else(|| EndpointInfo::fallback(DEFAULT_OUT_ENDPOINT, Direction::Out));
    let inp = endpoints
        .iter()
        .find(|ep| ep.carries_data(Direction::In))
        .cloned()
        .unwrap_or_else(|| EndpointInfo::fallback(DEFAULT_IN_ENDPOINT, Direction::In));
    (out, inp)
}

fn detach_kernel_drivers(device: &Device<rusb::Context>, handle: &mut DeviceHandle<rusb::Context>) -> Result<()> {
    if !rusb::supports_detach_kernel_driver() {
        return Ok(());
    }

    let num_configurations = device.device_descriptor()?.num_configurations();
    for index in 0..num_configurations {
        let config_descriptor = match device.config_descriptor(index) {
            Ok(config) => config,
            Err(e) => {
                debug!("No configuration descriptor {}: {}", index, e);
                continue;
            }
        };
        for interface in config_descriptor.interfaces() {
            let ifnum = interface.number();
            if !handle.kernel_driver_active(ifnum).unwrap_or(false) {
                continue;
            }
            match handle.detach_kernel_driver(ifnum) {
                Ok(()) => info!("Detached kernel driver from interface {}", ifnum),
                Err(e) => warn!("Could not detach kernel driver from interface {}: {}", ifnum, e),
            }
        }
    }
    Ok(())
}

fn select_first_configuration(device: &Device<rusb::Context>, handle: &mut DeviceHandle<rusb::Context>) -> Result<()> {
    let target = device.config_descriptor(0)?.number();
    if handle.active_configuration().ok() == Some(target) {
        trace!("Configuration {} already active", target);
        return Ok(());
    }
    handle.set_active_configuration(target)?;
    debug!("Activated configuration {}", target);
    Ok(())
}

pub struct UsbTransport {
    handle: DeviceHandle<rusb::Context>,
    out_endpoint: EndpointInfo,
    in_endpoint: EndpointInfo,
    timeout: Duration,
}

impl UsbTransport {
    pub fn open(device: Device<rusb::Context>, timeout: Duration) -> Result<Self> {
        let mut handle = device.open()?;

        detach_kernel_drivers(&device, &mut handle)?;
        select_first_configuration(&device, &mut handle)?;

        let endpoints = enumerate_endpoints(&device);
        for ep in &endpoints {
            debug!("{}", ep);
        }
        let (out_endpoint, in_endpoint) = select_endpoints(&endpoints);

        handle.claim_interface(out_endpoint.interface)?;
        if in_endpoint.interface != out_endpoint.interface {
            handle.claim_interface(in_endpoint.interface)?;
        }

        Ok(UsbTransport {
            handle,
            out_endpoint,
            in_endpoint,
            timeout,
        })
    }
}

impl Transport for UsbTransport {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let ep = &self.out_endpoint;
        trace!("OUT 0x{:02X}: {:02X?}", ep.address, data);
        let written = match ep.transfer_type {
            TransferType::Interrupt => self.handle.write_interrupt(ep.address, data, self.timeout)?,
            _ => self.handle.write_bulk(ep.address, data, self.timeout)?,
        };
        Ok(written)
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let ep = &self.in_endpoint;
        let read = match ep.transfer_type {
            TransferType::Interrupt => self.handle.read_interrupt(ep.address, buffer, self.timeout)?,
            _ => self.handle.read_bulk(ep.address, buffer, self.timeout)?,
        };
        trace!("IN 0x{:02X}: {:02X?}", ep.address, &buffer[..read]);
        Ok(read)
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        let _ = self.handle.release_interface(self.out_endpoint.interface);
        if self.in_endpoint.interface != self.out_endpoint.interface {
            let _ = self.handle.release_interface(self.in_endpoint.interface);
        }
    }
}

/// Lazily opens each device matching the IDs.
pub fn open_matching(
    vendor_id: u16,
    product_id: u16,
    timeout: Duration,
) -> Result<impl Iterator<Item = Result<UsbTransport>>> {
    let devices = find_devices_by_vid_pid(vendor_id, product_id)?;
    Ok(devices.into_iter().map(move |device| {
        let bus = device.bus_number();
        let address = device.address();
        UsbTransport::open(device, timeout).map_err(|e| {
            debug!("Open failed at bus {} address {}: {}", bus, address, e);
            e
        })
    }))
}
