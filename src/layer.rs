use crate::calibration::{Sensor, SensorRecord};
use crate::error::Error;
use crate::frame::{self, AttitudeConvention};
use crate::geo::{Reprojector, SourceCrs};
use crate::shader::{ProgramCache, ProgramSource};
use crate::station::{StationRecord, StationRegistry};
use crate::streaming::{StreamingCache, StreamingState};
use crate::texture::{Dispose, ImageFetcher, UrlTemplate};
use futures::future;
use log::warn;
use nalgebra::{Matrix4, Point3, Vector3};

/// Load-time configuration of an oriented-image layer.
#[derive(Clone, Debug)]
pub struct LayerConfig {
    /// Image URL template with `{imageId}`/`{sensorId}` placeholders.
    pub images: String,
    /// Fixed offset added to raw station positions before reprojection.
    pub offset: Vector3<f64>,
    pub convention: AttitudeConvention,
    pub crs: SourceCrs,
}

/// The oriented-imagery layer state.
///
/// Owns the station registry, the rig calibration, the streaming texture
/// cache, and the derived transforms; one value per layer, handed by
/// reference into each operation.
pub struct OrientedImageLayer<T> {
    registry: StationRegistry,
    sensors: Vec<Sensor>,
    convention: AttitudeConvention,
    template: UrlTemplate,
    cache: StreamingCache<T>,
    programs: ProgramCache,
    uses_distortion: bool,
    world_to_station: Matrix4<f64>,
    /// Per-sensor view-to-texture matrices, rewritten in place every tick.
    sensor_matrices: Vec<Matrix4<f64>>,
}

impl<T: Dispose> OrientedImageLayer<T> {
    /// Performs the load-time reprojection and calibration parsing.
    ///
    /// Fails with [`Error::InvalidCalibration`] or [`Error::Reprojection`];
    /// no partial layer is ever observable.
    pub fn initialize<R>(
        stations: &[StationRecord],
        sensors: &[SensorRecord],
        config: &LayerConfig,
        reprojector: &R,
    ) -> Result<Self, Error>
    where
        R: Reprojector + Sync,
    {
        let registry =
            StationRegistry::from_records(stations, &config.offset, &config.crs, reprojector)?;

        let rig_correction = config.convention.rig_correction();
        let sensors = sensors
            .iter()
            .map(|rec| Sensor::from_record(rec, &rig_correction))
            .collect::<Result<Vec<_>, Error>>()?;

        // Whole-rig flag: any sensor carrying distortion data compiles the
        // correction branch in for all of them.
        let uses_distortion = sensors.iter().any(|s| s.distortion().is_some());
        let sensor_count = sensors.len();

        let mut programs = ProgramCache::new();
        programs.get(sensor_count, uses_distortion);

        Ok(Self {
            registry,
            sensors,
            convention: config.convention,
            template: UrlTemplate::new(config.images.clone()),
            cache: StreamingCache::new(),
            programs,
            uses_distortion,
            world_to_station: Matrix4::identity(),
            sensor_matrices: vec![Matrix4::identity(); sensor_count],
        })
    }

    /// Drives the selection and streaming tick for a new viewpoint.
    ///
    /// `camera_to_world` is the viewpoint's world transform. When the
    /// nearest station is unchanged and ready this only refreshes the
    /// per-sensor matrices; when it changed, all sensor images are fetched
    /// and joined before the station becomes ready. Fetch failures are
    /// absorbed: the previously bound imagery stays displayed and the next
    /// tick retries.
    pub async fn on_viewpoint_changed<F>(&mut self, camera_to_world: &Matrix4<f64>, fetcher: &F)
    where
        F: ImageFetcher<Texture = T>,
    {
        let viewpoint = Point3::new(
            camera_to_world[(0, 3)],
            camera_to_world[(1, 3)],
            camera_to_world[(2, 3)],
        );

        // Empty registry: compositing is skipped entirely.
        let Some(nearest) = self.registry.nearest(&viewpoint) else {
            return;
        };

        if self.cache.current_station() == Some(nearest) {
            if matches!(self.cache.state(), StreamingState::Ready(_)) {
                self.update_sensor_matrices(camera_to_world);
            }
            return;
        }

        let token = self.cache.begin(nearest);
        let station = self
            .registry
            .get(nearest)
            .expect("nearest returns an index into the registry");
        let station_id = station.id().to_string();

        // Fan out one fetch per sensor; the station becomes ready only when
        // every one of them arrived, assembled by sensor index.
        let fetches = self.sensors.iter().map(|sensor| {
            let url = self.template.url(&station_id, sensor.id());
            let sensor_id = sensor.id().to_string();
            let station_id = station_id.clone();
            async move {
                fetcher.fetch(&url).await.map_err(|reason| Error::Fetch {
                    station: station_id,
                    sensor: sensor_id,
                    reason,
                })
            }
        });

        let loaded = future::try_join_all(fetches).await;
        match loaded {
            Ok(textures) => {
                if self.cache.commit(token, textures) {
                    self.update_station_transform(nearest);
                    self.update_sensor_matrices(camera_to_world);
                }
            }
            Err(err) => {
                warn!("{err}");
                self.cache.abort(token);
            }
        }
    }

    /// Index of the station whose imagery is loading or loaded.
    pub fn current_station_index(&self) -> Option<usize> {
        self.cache.current_station()
    }

    /// World position of the next station in load order, wrapping around.
    ///
    /// Used by navigation controls to animate the viewer between stations.
    pub fn next_station_position(&self) -> Option<&Point3<f64>> {
        if self.registry.is_empty() {
            return None;
        }

        let next = self
            .cache
            .current_station()
            .map_or(0, |current| (current + 1) % self.registry.len());
        self.registry.get(next).map(|station| station.position())
    }

    /// The composite program for this rig, generated once per
    /// `(sensor count, distortion)` pair.
    pub fn composite_program(&mut self) -> &ProgramSource {
        self.programs.get(self.sensors.len(), self.uses_distortion)
    }

    /// Current per-sensor view-to-texture matrices, the `mvpp` uniform.
    pub fn sensor_matrices(&self) -> &[Matrix4<f64>] {
        &self.sensor_matrices
    }

    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    pub fn registry(&self) -> &StationRegistry {
        &self.registry
    }

    pub fn streaming_state(&self) -> StreamingState {
        self.cache.state()
    }

    /// Textures of the ready station, positionally by sensor.
    pub fn textures(&self) -> &[T] {
        self.cache.textures()
    }

    fn update_station_transform(&mut self, station_index: usize) {
        if let Some(station) = self.registry.get(station_index) {
            self.world_to_station =
                frame::world_to_station(station.position(), station.attitude(), self.convention);
        }
    }

    fn update_sensor_matrices(&mut self, camera_to_world: &Matrix4<f64>) {
        frame::update_sensor_matrices(
            &mut self.sensor_matrices,
            &self.sensors,
            &self.world_to_station,
            camera_to_world,
        );
    }
}
