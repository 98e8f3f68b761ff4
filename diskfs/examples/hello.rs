use diskfs::io::FileBlockEmulatorBuilder;
use diskfs::DiskFs;

pub fn main() {
    let tmp = tempfile::tempfile().unwrap();
    let dev = FileBlockEmulatorBuilder::from(tmp)
        .with_block_count(64)
        .build()
        .expect("Could not initialize disk emulator.");

    // create a new file system on the device and write a file into it
    let mut fs = DiskFs::create(dev).expect("should create");
    fs.create_directory("/hello").unwrap();
    fs.create_file("/hello/world.txt").unwrap();
    fs.write_file("/hello/world.txt", b"hello, world\n", 0).unwrap();

    let contents = fs.read_file("/hello/world.txt", 64, 0).unwrap();
    print!("{}", String::from_utf8_lossy(&contents));
    println!("{:?}", fs.list_directory("/hello").unwrap());
}
