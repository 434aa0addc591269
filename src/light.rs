use crate::constants::Command;
use crate::device::TelinkMesh;
use crate::error::TelinkError;
use crate::transport::Transport;
use std::ops::{Deref, DerefMut};

pub const MIN_TEMPERATURE: u16 = 2700;
pub const MAX_TEMPERATURE: u16 = 6500;

/// Below this the warm-white channel ramps, above it the yellow one
const TEMPERATURE_PIVOT: u16 = 4600;

const MAX_BRIGHTNESS: u8 = 100;

/// Brightness used by temperature changes when the light was fully dimmed
const MIN_TEMPERATURE_BRIGHTNESS: u8 = 3;

/// A mesh node that is a dimmable RGB/CCT light.
///
/// Dereferences to [`TelinkMesh`] for connection handling and mesh commands.
#[derive(Debug)]
pub struct TelinkLight<T: Transport> {
    mesh: TelinkMesh<T>,
    state: bool,
    brightness: u8,
    music_mode: bool,
}

impl<T: Transport> TelinkLight<T> {
    pub fn new(mesh: TelinkMesh<T>) -> Self {
        Self {
            mesh,
            state: false,
            brightness: MAX_BRIGHTNESS,
            music_mode: false,
        }
    }

    pub fn into_inner(self) -> TelinkMesh<T> {
        self.mesh
    }

    /// Last state requested with [`TelinkLight::set_state`]
    pub fn state(&self) -> bool {
        self.state
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    pub fn music_mode(&self) -> bool {
        self.music_mode
    }

    pub async fn set_state(&mut self, on: bool) -> Result<(), TelinkError> {
        self.state = on;
        self.mesh.send_packet(Command::LightOnOff, &[u8::from(on), 0, 0]).await
    }

    /// Percent, clamped to 0-100
    pub async fn set_brightness(&mut self, brightness: u8) -> Result<(), TelinkError> {
        self.brightness = brightness.min(MAX_BRIGHTNESS);
        self.mesh
            .send_packet(Command::LightAttributes, &[self.brightness, 0, 0, 0, 0, 0, 0, 1])
            .await
    }

    /// Colour temperature in kelvin, clamped to 2700-6500
    pub async fn set_temperature(&mut self, kelvin: u16) -> Result<(), TelinkError> {
        let (yellow, white) = temperature_channels(kelvin);
        if self.brightness == 0 {
            self.brightness = MIN_TEMPERATURE_BRIGHTNESS;
        }
        self.mesh
            .send_packet(Command::LightAttributes, &[self.brightness, 0, 0, 0, yellow, white, 0, 0])
            .await
    }

    pub async fn set_color(&mut self, red: u8, green: u8, blue: u8) -> Result<(), TelinkError> {
        let payload = [self.brightness, red, green, blue, 0, 0, u8::from(self.music_mode), 0];
        self.mesh.send_packet(Command::LightAttributes, &payload).await
    }

    /// Only stored; applied with the next [`TelinkLight::set_color`]
    pub fn set_music_mode(&mut self, music_mode: bool) {
        self.music_mode = music_mode;
    }

    /// Start one of the built-in light effects
    pub async fn load_mode(&mut self, mode: u8, speed: u8) -> Result<(), TelinkError> {
        self.mesh
            .send_packet(Command::LightModeLoad, &[mode, speed, self.brightness])
            .await
    }

    pub async fn query_status(&self) -> Result<(), TelinkError> {
        self.mesh.send_packet(Command::StatusQuery, &[0x10]).await
    }
}

impl<T: Transport> Deref for TelinkLight<T> {
    type Target = TelinkMesh<T>;

    fn deref(&self) -> &Self::Target {
        &self.mesh
    }
}

impl<T: Transport> DerefMut for TelinkLight<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.mesh
    }
}

/// Yellow and white channel levels for a colour temperature
pub fn temperature_channels(kelvin: u16) -> (u8, u8) {
    let kelvin = kelvin.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE);
    let span = u32::from(TEMPERATURE_PIVOT - MIN_TEMPERATURE);
    if kelvin > TEMPERATURE_PIVOT {
        let yellow = u32::from(MAX_TEMPERATURE - kelvin) * 255 / span;
        (yellow as u8, u8::MAX)
    } else {
        let white = u32::from(kelvin - MIN_TEMPERATURE) * 255 / span;
        (u8::MAX, white as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temperature_channels() {
        assert_eq!(temperature_channels(2700), (255, 0));
        assert_eq!(temperature_channels(1000), (255, 0));
        assert_eq!(temperature_channels(4600), (255, 255));
        assert_eq!(temperature_channels(6500), (0, 255));
        assert_eq!(temperature_channels(9000), (0, 255));
        assert_eq!(temperature_channels(3650), (255, 127));
        assert_eq!(temperature_channels(5550), (127, 255));
    }
}
