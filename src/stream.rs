//! Frame-synchronous streaming inference driver
//!
//! Runs the four note-model sub-networks one CQT frame at a time. The
//! sub-networks have different latencies, so their outputs are re-aligned
//! through fixed-depth delay lines before anything is written into the
//! posteriorgrams:
//!
//! - the onset-input feature is delayed until it lines up with the note row
//!   entering the final onset network,
//! - the contour and note rows are delayed until they line up with the onset
//!   row leaving it.
//!
//! Each delay line is a ring indexed by a head pointer; reading one slot ahead
//! of the head yields the value stored depth-1 frames in the past.

use ndarray::{Array2, ArrayView3};

use crate::cnn::{CnnModel, FrameModel};
use crate::diag;
use crate::error::{Result, ScoreError};

/// Harmonics stacked per CQT frame.
pub const NUM_HARMONICS: usize = 8;
/// Contour bins per frame (88 semitones x 3 bins).
pub const NUM_FREQ_IN: usize = 264;
/// Note/onset bins per frame (piano keys).
pub const NUM_FREQ_OUT: usize = 88;

/// Onset-input feature channels per note bin.
const ONSET_FEATURE_CHANNELS: usize = 32;
/// Width of one concatenated row fed to the final onset network.
const CONCAT_WIDTH: usize = NUM_FREQ_OUT * (ONSET_FEATURE_CHANNELS + 1);

/// Per-sub-network latencies in frames, fixed properties of the companion
/// model files.
const LOOKAHEAD_CONTOUR: usize = 3;
const LOOKAHEAD_NOTE: usize = 6;
const LOOKAHEAD_ONSET_INPUT: usize = 2;
const LOOKAHEAD_ONSET_OUTPUT: usize = 1;

/// Total lookahead of the combined models, in frames.
pub const TOTAL_LOOKAHEAD: usize = LOOKAHEAD_CONTOUR + LOOKAHEAD_NOTE + LOOKAHEAD_ONSET_OUTPUT;

const NUM_CONTOUR_STORED: usize = LOOKAHEAD_NOTE + LOOKAHEAD_ONSET_OUTPUT + 1;
const NUM_NOTE_STORED: usize = LOOKAHEAD_ONSET_OUTPUT + 1;
const NUM_CONCAT2_STORED: usize = LOOKAHEAD_CONTOUR + LOOKAHEAD_NOTE - LOOKAHEAD_ONSET_INPUT + 1;

/// Fixed-depth delay line over rows of equal width.
///
/// Writes go to the head slot; `read_ahead` returns the slot one position past
/// the head, which holds the row stored depth-1 advances earlier.
struct DelayLine {
    slots: Vec<Vec<f32>>,
    head: usize,
}

impl DelayLine {
    fn new(depth: usize, width: usize) -> Self {
        Self {
            slots: vec![vec![0.0; width]; depth],
            head: 0,
        }
    }

    fn write_head(&mut self, row: &[f32]) {
        self.slots[self.head].copy_from_slice(row);
    }

    fn read_ahead(&self) -> &[f32] {
        &self.slots[(self.head + 1) % self.slots.len()]
    }

    fn advance(&mut self) {
        self.head = (self.head + 1) % self.slots.len();
    }

    fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.fill(0.0);
        }
        self.head = 0;
    }
}

/// The three per-transcription posteriorgrams, one row per CQT frame.
pub struct Posteriorgrams {
    /// `[frames x 88]`, pitch-pooled onset probabilities
    pub onsets: Array2<f32>,
    /// `[frames x 88]`, note activation probabilities
    pub notes: Array2<f32>,
    /// `[frames x 264]`, semitone-subdivided pitch contours
    pub contours: Array2<f32>,
}

/// Driver over the four sub-networks, generic over the forward capability so
/// alignment can be exercised without real model files.
pub struct StreamingDriver<M: FrameModel> {
    contour_net: M,
    note_net: M,
    onset_input_net: M,
    onset_output_net: M,
    contour_buf: DelayLine,
    note_buf: DelayLine,
    concat2_buf: DelayLine,
    concat_row: Vec<f32>,
}

impl StreamingDriver<CnnModel> {
    /// Load the four sub-networks from their JSON files in `model_dir` and
    /// validate their output widths.
    pub fn from_model_dir<P: AsRef<std::path::Path>>(model_dir: P) -> Result<Self> {
        let dir = model_dir.as_ref();
        let contour_net = CnnModel::from_file(dir.join("cnn_contour_model.json"))?;
        let note_net = CnnModel::from_file(dir.join("cnn_note_model.json"))?;
        let onset_input_net = CnnModel::from_file(dir.join("cnn_onset_1_model.json"))?;
        let onset_output_net = CnnModel::from_file(dir.join("cnn_onset_2_model.json"))?;

        let widths = [
            ("cnn_contour_model", contour_net.output_len(), NUM_FREQ_IN),
            ("cnn_note_model", note_net.output_len(), NUM_FREQ_OUT),
            (
                "cnn_onset_1_model",
                onset_input_net.output_len(),
                ONSET_FEATURE_CHANNELS * NUM_FREQ_OUT,
            ),
            ("cnn_onset_2_model", onset_output_net.output_len(), NUM_FREQ_OUT),
        ];
        for (name, actual, expected) in widths {
            if actual != expected {
                return Err(ScoreError::Shape(format!(
                    "{} produces {} values per frame, expected {}",
                    name, actual, expected
                )));
            }
        }

        Ok(Self::new(
            contour_net,
            note_net,
            onset_input_net,
            onset_output_net,
        ))
    }
}

impl<M: FrameModel> StreamingDriver<M> {
    pub fn new(contour_net: M, note_net: M, onset_input_net: M, onset_output_net: M) -> Self {
        Self {
            contour_net,
            note_net,
            onset_input_net,
            onset_output_net,
            contour_buf: DelayLine::new(NUM_CONTOUR_STORED, NUM_FREQ_IN),
            note_buf: DelayLine::new(NUM_NOTE_STORED, NUM_FREQ_OUT),
            concat2_buf: DelayLine::new(
                NUM_CONCAT2_STORED,
                ONSET_FEATURE_CHANNELS * NUM_FREQ_OUT,
            ),
            concat_row: vec![0.0; CONCAT_WIDTH],
        }
    }

    /// Tear the driver apart, returning the four sub-networks in wiring order.
    pub fn into_parts(self) -> (M, M, M, M) {
        (
            self.contour_net,
            self.note_net,
            self.onset_input_net,
            self.onset_output_net,
        )
    }

    /// Zero all delay lines, reset head pointers and sub-network state.
    pub fn reset(&mut self) {
        self.contour_buf.reset();
        self.note_buf.reset();
        self.concat2_buf.reset();
        self.contour_net.reset();
        self.note_net.reset();
        self.onset_input_net.reset();
        self.onset_output_net.reset();
    }

    /// Run one frame through all four sub-networks and read back the aligned
    /// contour/note/onset rows.
    pub fn frame_inference(
        &mut self,
        cqt_frame: &[f32],
        out_contour: &mut [f32],
        out_note: &mut [f32],
        out_onset: &mut [f32],
    ) -> Result<()> {
        self.run_models(cqt_frame)?;

        out_onset.copy_from_slice(self.onset_output_net.outputs());
        out_note.copy_from_slice(self.note_buf.read_ahead());
        out_contour.copy_from_slice(self.contour_buf.read_ahead());

        self.contour_buf.advance();
        self.note_buf.advance();
        self.concat2_buf.advance();
        Ok(())
    }

    fn run_models(&mut self, cqt_frame: &[f32]) -> Result<()> {
        self.onset_input_net.forward(cqt_frame);
        let onset_feature = self.onset_input_net.outputs();
        if onset_feature.len() != ONSET_FEATURE_CHANNELS * NUM_FREQ_OUT {
            return Err(ScoreError::Shape(format!(
                "onset-input row has {} values, expected {}",
                onset_feature.len(),
                ONSET_FEATURE_CHANNELS * NUM_FREQ_OUT
            )));
        }
        self.concat2_buf.write_head(onset_feature);

        self.contour_net.forward(cqt_frame);
        let contour_row = self.contour_net.outputs();
        if contour_row.len() != NUM_FREQ_IN {
            return Err(ScoreError::Shape(format!(
                "contour row has {} values, expected {}",
                contour_row.len(),
                NUM_FREQ_IN
            )));
        }
        self.contour_buf.write_head(contour_row);

        self.note_net.forward(contour_row);
        let note_row = self.note_net.outputs();
        if note_row.len() != NUM_FREQ_OUT {
            return Err(ScoreError::Shape(format!(
                "note row has {} values, expected {}",
                note_row.len(),
                NUM_FREQ_OUT
            )));
        }
        self.note_buf.write_head(note_row);

        // interleave the fresh note row with the delayed onset feature:
        // row[i*33] = note[i], row[i*33+1..i*33+33] = feature[i*32..(i+1)*32]
        let delayed_feature = self.concat2_buf.read_ahead();
        for i in 0..NUM_FREQ_OUT {
            let base = i * (ONSET_FEATURE_CHANNELS + 1);
            self.concat_row[base] = note_row[i];
            self.concat_row[base + 1..base + 1 + ONSET_FEATURE_CHANNELS].copy_from_slice(
                &delayed_feature[i * ONSET_FEATURE_CHANNELS..(i + 1) * ONSET_FEATURE_CHANNELS],
            );
        }

        self.onset_output_net.forward(&self.concat_row);
        let onset_row = self.onset_output_net.outputs();
        if onset_row.len() != NUM_FREQ_OUT {
            return Err(ScoreError::Shape(format!(
                "onset row has {} values, expected {}",
                onset_row.len(),
                NUM_FREQ_OUT
            )));
        }
        Ok(())
    }

    /// Run the full schedule over a `[frames, 264, 8]` CQT tensor and collect
    /// the posteriorgrams.
    ///
    /// The schedule primes the delay lines with `TOTAL_LOOKAHEAD` frames of
    /// zeros, replays the first `TOTAL_LOOKAHEAD` real frames into scratch
    /// rows, then streams the remaining frames into their aligned rows and
    /// flushes the tail with zeros. Every posteriorgram row i ends up holding
    /// the outputs aligned with feature frame i, and each row is written once.
    pub fn run(&mut self, cqt: ArrayView3<'_, f32>) -> Result<Posteriorgrams> {
        let num_frames = cqt.shape()[0];
        if cqt.shape()[1] != NUM_FREQ_IN || cqt.shape()[2] != NUM_HARMONICS {
            return Err(ScoreError::Shape(format!(
                "CQT tensor is {:?}, expected [T, {}, {}]",
                cqt.shape(),
                NUM_FREQ_IN,
                NUM_HARMONICS
            )));
        }

        self.reset();

        let mut onsets = Array2::<f32>::zeros((num_frames, NUM_FREQ_OUT));
        let mut notes = Array2::<f32>::zeros((num_frames, NUM_FREQ_OUT));
        let mut contours = Array2::<f32>::zeros((num_frames, NUM_FREQ_IN));

        let zero_frame = vec![0.0f32; NUM_HARMONICS * NUM_FREQ_IN];
        let mut frame_buf = vec![0.0f32; NUM_HARMONICS * NUM_FREQ_IN];
        let mut scratch_contour = vec![0.0f32; NUM_FREQ_IN];
        let mut scratch_note = vec![0.0f32; NUM_FREQ_OUT];
        let mut scratch_onset = vec![0.0f32; NUM_FREQ_OUT];

        let lookahead = TOTAL_LOOKAHEAD.min(num_frames);
        let heartbeat = diag::heartbeat_every(num_frames);

        diag::emit("stream", "warmup_zero_start", "", Some(0.705));
        for _ in 0..TOTAL_LOOKAHEAD {
            self.frame_inference(
                &zero_frame,
                &mut scratch_contour,
                &mut scratch_note,
                &mut scratch_onset,
            )?;
        }

        diag::emit("stream", "warmup_cqt_start", "", Some(0.72));
        for frame_idx in 0..lookahead {
            copy_frame(&cqt, frame_idx, &mut frame_buf);
            self.frame_inference(
                &frame_buf,
                &mut scratch_contour,
                &mut scratch_note,
                &mut scratch_onset,
            )?;
        }

        diag::emit("stream", "stream_inference_start", "", Some(0.735));
        for frame_idx in TOTAL_LOOKAHEAD..num_frames {
            let row = frame_idx - TOTAL_LOOKAHEAD;
            copy_frame(&cqt, frame_idx, &mut frame_buf);
            self.frame_into_rows(&frame_buf, row, &mut contours, &mut notes, &mut onsets)?;

            let processed = row + 1;
            if processed % heartbeat == 0 {
                diag::emit(
                    "stream",
                    "stream_inference_heartbeat",
                    &format!("frame={}/{}", processed, num_frames),
                    None,
                );
            }
        }

        diag::emit("stream", "tail_flush_start", "", Some(0.85));
        let tail_start = num_frames.saturating_sub(TOTAL_LOOKAHEAD.min(num_frames));
        for row in tail_start..num_frames {
            self.frame_into_rows(&zero_frame, row, &mut contours, &mut notes, &mut onsets)?;
        }
        diag::emit("stream", "tail_flush_done", "", Some(0.86));

        Ok(Posteriorgrams {
            onsets,
            notes,
            contours,
        })
    }

    fn frame_into_rows(
        &mut self,
        frame: &[f32],
        row: usize,
        contours: &mut Array2<f32>,
        notes: &mut Array2<f32>,
        onsets: &mut Array2<f32>,
    ) -> Result<()> {
        let mut contour_row = contours.row_mut(row);
        let mut note_row = notes.row_mut(row);
        let mut onset_row = onsets.row_mut(row);
        self.frame_inference(
            frame,
            contour_row.as_slice_mut().expect("contiguous row"),
            note_row.as_slice_mut().expect("contiguous row"),
            onset_row.as_slice_mut().expect("contiguous row"),
        )
    }
}

fn copy_frame(cqt: &ArrayView3<'_, f32>, frame_idx: usize, out: &mut [f32]) {
    for (dst, src) in out
        .iter_mut()
        .zip(cqt.index_axis(ndarray::Axis(0), frame_idx).iter())
    {
        *dst = *src;
    }
}
